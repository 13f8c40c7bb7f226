//! Sessions (server tab, channels, dialogs) and their user lists.

use std::collections::HashMap;

use slirc_proto::{Casemapping, PrefixSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    Server,
    Channel,
    Dialog,
    Notices,
}

/// Per-session override of a global alert setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriState {
    On,
    Off,
    #[default]
    UseGlobal,
}

impl TriState {
    pub fn resolve(self, global: bool) -> bool {
        match self {
            TriState::On => true,
            TriState::Off => false,
            TriState::UseGlobal => global,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertFlags {
    pub beep: TriState,
    pub tray: TriState,
    pub taskbar: TriState,
}

/// A member of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub host: Option<String>,
    pub realname: Option<String>,
    pub account: Option<String>,
    /// Bit `i` set = the user holds the `i`-th privilege of `PREFIX`.
    pub access: u32,
    pub prefix: Option<char>,
    pub away: bool,
}

impl User {
    pub fn new(nick: &str) -> Self {
        User {
            nick: nick.to_owned(),
            host: None,
            realname: None,
            account: None,
            access: 0,
            prefix: None,
            away: false,
        }
    }

    pub fn has_rank(&self, rank: usize) -> bool {
        rank < 32 && self.access & (1 << rank) != 0
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub name: String,
    pub kind: SessionKind,
    /// Mode letters with their arguments, in the order they were set.
    pub mode_list: Vec<(char, Option<String>)>,
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub topic: Option<String>,
    pub alerts: AlertFlags,
    pub joined: bool,
    casemap: Casemapping,
    prefix: PrefixSpec,
    users: HashMap<String, User>,
    /// Members per privilege rank.
    counts: Vec<u32>,
}

impl Session {
    pub fn new(name: &str, kind: SessionKind, casemap: Casemapping, prefix: PrefixSpec) -> Self {
        let ranks = prefix.modes.chars().count();
        Session {
            name: name.to_owned(),
            kind,
            mode_list: Vec::new(),
            key: None,
            limit: None,
            topic: None,
            alerts: AlertFlags::default(),
            joined: false,
            casemap,
            prefix,
            users: HashMap::new(),
            counts: vec![0; ranks],
        }
    }

    pub fn is_channel(&self) -> bool {
        self.kind == SessionKind::Channel
    }

    /// Adopt new `CASEMAPPING`/`PREFIX` tables. Only valid before the user
    /// list is populated; existing users are dropped.
    pub fn set_tables(&mut self, casemap: Casemapping, prefix: PrefixSpec) {
        self.clear_users();
        self.counts = vec![0; prefix.modes.chars().count()];
        self.casemap = casemap;
        self.prefix = prefix;
    }

    fn key_of(&self, nick: &str) -> String {
        self.casemap.to_lower(nick)
    }

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&self.key_of(nick))
    }

    pub fn user_mut(&mut self, nick: &str) -> Option<&mut User> {
        let key = self.key_of(nick);
        self.users.get_mut(&key)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Add a member, or update the host of an existing one. `prefixes`
    /// are the NAMES prefix characters (several with multi-prefix).
    pub fn add_user(&mut self, nick: &str, host: Option<&str>, prefixes: &str) {
        let key = self.key_of(nick);
        let user = self.users.entry(key).or_insert_with(|| User::new(nick));
        if let Some(host) = host {
            user.host = Some(host.to_owned());
        }
        let ranks: Vec<usize> = prefixes
            .chars()
            .filter_map(|c| self.prefix.rank_of_prefix(c))
            .collect();
        for rank in ranks {
            self.flip(nick, rank, true);
        }
    }

    /// Remove a member, releasing its privilege counts.
    pub fn remove_user(&mut self, nick: &str) -> Option<User> {
        let key = self.key_of(nick);
        let user = self.users.remove(&key)?;
        for rank in 0..self.counts.len() {
            if user.has_rank(rank) {
                self.counts[rank] -= 1;
            }
        }
        Some(user)
    }

    pub fn rename_user(&mut self, old: &str, new: &str) -> bool {
        let key = self.key_of(old);
        match self.users.remove(&key) {
            Some(mut user) => {
                user.nick = new.to_owned();
                let key = self.key_of(new);
                self.users.insert(key, user);
                true
            }
            None => false,
        }
    }

    pub fn clear_users(&mut self) {
        self.users.clear();
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Grant or revoke a privilege letter. Returns `true` if the bit
    /// actually changed; the matching counter moves by exactly one.
    pub fn set_access(&mut self, nick: &str, letter: char, on: bool) -> bool {
        match self.prefix.rank_of_mode(letter) {
            Some(rank) => self.flip(nick, rank, on),
            None => false,
        }
    }

    fn flip(&mut self, nick: &str, rank: usize, on: bool) -> bool {
        if rank >= 32 || rank >= self.counts.len() {
            return false;
        }
        let key = self.key_of(nick);
        let Some(user) = self.users.get_mut(&key) else {
            return false;
        };
        let bit = 1u32 << rank;
        if (user.access & bit != 0) == on {
            return false;
        }
        user.access ^= bit;
        if on {
            self.counts[rank] += 1;
        } else {
            self.counts[rank] -= 1;
        }
        user.prefix = (0..self.counts.len())
            .find(|r| user.access & (1 << r) != 0)
            .and_then(|r| self.prefix.prefixes.chars().nth(r));
        true
    }

    /// Members holding the privilege `letter`.
    pub fn count(&self, letter: char) -> u32 {
        self.prefix
            .rank_of_mode(letter)
            .and_then(|rank| self.counts.get(rank).copied())
            .unwrap_or(0)
    }

    pub fn ops(&self) -> u32 {
        self.count('o')
    }

    pub fn halfops(&self) -> u32 {
        self.count('h')
    }

    pub fn voices(&self) -> u32 {
        self.count('v')
    }

    /// Canonical mode string, e.g. `+kl secret 10`.
    pub fn modes(&self) -> String {
        if self.mode_list.is_empty() {
            return String::new();
        }
        let mut out = String::from("+");
        out.extend(self.mode_list.iter().map(|(letter, _)| *letter));
        for arg in self.mode_list.iter().filter_map(|(_, arg)| arg.as_deref()) {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    /// Mark the session as no longer connected.
    pub fn disconnect(&mut self) {
        self.joined = false;
        self.clear_users();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Session {
        Session::new(
            "#rust",
            SessionKind::Channel,
            Casemapping::Rfc1459,
            PrefixSpec::default(),
        )
    }

    #[test]
    fn test_counters_follow_bits() {
        let mut chan = channel();
        chan.add_user("Alice", Some("a@host"), "@+");
        chan.add_user("bob", None, "");
        assert_eq!(chan.ops(), 1);
        assert_eq!(chan.voices(), 1);
        assert_eq!(chan.user("alice").unwrap().prefix, Some('@'));

        assert!(chan.set_access("BOB", 'o', true));
        assert!(!chan.set_access("bob", 'o', true));
        assert_eq!(chan.ops(), 2);

        assert!(chan.set_access("alice", 'o', false));
        assert_eq!(chan.user("alice").unwrap().prefix, Some('+'));
        assert_eq!(chan.ops(), 1);

        chan.remove_user("alice");
        assert_eq!(chan.voices(), 0);
        assert_eq!(chan.ops(), 1);
    }

    #[test]
    fn test_rename_keeps_access() {
        let mut chan = channel();
        chan.add_user("nick[a]", None, "%");
        assert!(chan.rename_user("NICK{A}", "other"));
        assert_eq!(chan.halfops(), 1);
        assert_eq!(chan.user("other").unwrap().prefix, Some('%'));
    }

    #[test]
    fn test_tristate() {
        assert!(TriState::UseGlobal.resolve(true));
        assert!(!TriState::Off.resolve(true));
        assert!(TriState::On.resolve(false));
    }
}
