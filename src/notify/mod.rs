//! Notify list: presence tracking for watched nicks.
//!
//! Each server uses the best mechanism it offers: MONITOR, then WATCH,
//! then periodic ISON polling. Presence is tracked per (nick, server) and
//! moves unknown → online ⇄ offline; only transitions out of a known state
//! (and unknown → online) are reported.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use slirc_proto::irc_eq;
use tracing::{debug, warn};

use crate::server::{Server, ServerId};

/// Longest ISON line we build.
pub const ISON_LINE_MAX: usize = 460;
/// Longest MONITOR/WATCH line we build.
const LIST_LINE_MAX: usize = 400;

/// Presence information parsed from server replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceUpdate {
    /// 303: the nicks of the oldest outstanding ISON that are online.
    Ison(Vec<String>),
    /// 600/604/730.
    Online(String),
    /// 601/605/731.
    Offline(String),
    /// A QUIT seen in a channel.
    Quit(String),
    /// 734: the server's MONITOR list is full.
    ListFull,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyAction {
    Online { server: ServerId, nick: String },
    Offline { server: ServerId, nick: String },
}

#[derive(Clone, Debug, Default)]
pub struct Presence {
    pub online: bool,
    /// Some reply has told us the state at least once.
    pub known: bool,
    pub last_seen: Option<DateTime<Local>>,
    pub last_on: Option<DateTime<Local>>,
    pub last_off: Option<DateTime<Local>>,
}

#[derive(Clone, Debug)]
pub struct NotifyEntry {
    pub nick: String,
    /// Networks the entry is restricted to; empty means all.
    pub networks: Vec<String>,
    pub per_server: HashMap<ServerId, Presence>,
}

impl NotifyEntry {
    fn new(nick: &str, networks: Vec<String>) -> Self {
        NotifyEntry {
            nick: nick.to_owned(),
            networks,
            per_server: HashMap::new(),
        }
    }

    pub fn applies_to(&self, network: &str) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|n| n.eq_ignore_ascii_case(network))
    }

    pub fn is_online(&self) -> bool {
        self.per_server.values().any(|p| p.online)
    }
}

#[derive(Debug, Default)]
pub struct NotifyEngine {
    entries: Vec<NotifyEntry>,
    /// Outstanding ISON batches per server, oldest first.
    ison_pending: HashMap<ServerId, VecDeque<Vec<String>>>,
}

impl NotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `notify.conf`. A missing file is an empty list.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// `nick [net1,net2]` per line.
    pub fn parse(text: &str) -> Self {
        let mut engine = Self::default();
        for line in text.lines() {
            let mut words = line.split_whitespace();
            let Some(nick) = words.next() else {
                continue;
            };
            let networks = words
                .next()
                .map(|n| n.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default();
            engine.add(nick, networks);
        }
        engine
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.nick);
            if !entry.networks.is_empty() {
                out.push(' ');
                out.push_str(&entry.networks.join(","));
            }
            out.push('\n');
        }
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_text())
    }

    pub fn entries(&self) -> &[NotifyEntry] {
        &self.entries
    }

    pub fn find(&self, nick: &str) -> Option<&NotifyEntry> {
        self.entries.iter().find(|e| irc_eq(&e.nick, nick))
    }

    fn find_mut(&mut self, nick: &str) -> Option<&mut NotifyEntry> {
        self.entries.iter_mut().find(|e| irc_eq(&e.nick, nick))
    }

    /// Add a nick, or replace the network restriction of an existing one.
    /// Returns `true` if the nick is new.
    pub fn add(&mut self, nick: &str, networks: Vec<String>) -> bool {
        match self.find_mut(nick) {
            Some(entry) => {
                entry.networks = networks;
                false
            }
            None => {
                self.entries.push(NotifyEntry::new(nick, networks));
                true
            }
        }
    }

    pub fn remove(&mut self, nick: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !irc_eq(&e.nick, nick));
        self.entries.len() != before
    }

    fn nicks_for(&self, network: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.applies_to(network))
            .map(|e| e.nick.as_str())
            .collect()
    }

    /// Lines to register the whole list with a freshly logged-in server.
    /// Nothing for ISON servers; they are polled by [`tick`](Self::tick).
    pub fn on_login(&mut self, server: &Server) -> Vec<String> {
        self.ison_pending.remove(&server.id);
        let nicks = self.nicks_for(server.network_label());
        if nicks.is_empty() {
            return Vec::new();
        }
        if server.caps.supports_monitor {
            let limit = server.caps.monitor_limit.unwrap_or(usize::MAX);
            if nicks.len() > limit {
                warn!(server = %server.host, limit, count = nicks.len(), "notify list exceeds MONITOR limit");
            }
            let nicks: Vec<&str> = nicks.into_iter().take(limit).collect();
            pack("MONITOR + ", &nicks, ",", LIST_LINE_MAX)
        } else if server.caps.supports_watch {
            let plus: Vec<String> = nicks.iter().map(|n| format!("+{}", n)).collect();
            let plus: Vec<&str> = plus.iter().map(String::as_str).collect();
            pack("WATCH ", &plus, " ", LIST_LINE_MAX)
        } else {
            Vec::new()
        }
    }

    /// Line to start watching one nick on `server`, if it pushes presence.
    pub fn watch_line(&self, server: &Server, nick: &str, add: bool) -> Option<String> {
        let sign = if add { '+' } else { '-' };
        if server.caps.supports_monitor {
            Some(format!("MONITOR {} {}", sign, nick))
        } else if server.caps.supports_watch {
            Some(format!("WATCH {}{}", sign, nick))
        } else {
            None
        }
    }

    /// ISON poll for a server without MONITOR or WATCH. Each line is queued
    /// so replies can be matched in order.
    pub fn tick(&mut self, server: &Server) -> Vec<String> {
        if server.caps.supports_monitor || server.caps.supports_watch {
            return Vec::new();
        }
        let nicks = self.nicks_for(server.network_label());
        if nicks.is_empty() {
            return Vec::new();
        }
        let mut lines = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        let mut len = "ISON".len();
        for nick in nicks {
            if !batch.is_empty() && len + 1 + nick.len() > ISON_LINE_MAX {
                lines.push(std::mem::take(&mut batch));
                len = "ISON".len();
            }
            len += 1 + nick.len();
            batch.push(nick.to_owned());
        }
        if !batch.is_empty() {
            lines.push(batch);
        }
        let pending = self.ison_pending.entry(server.id).or_default();
        lines
            .into_iter()
            .map(|batch| {
                let line = format!("ISON {}", batch.join(" "));
                pending.push_back(batch);
                line
            })
            .collect()
    }

    /// A 303 reply. It answers the oldest outstanding request whose nicks
    /// cover every name listed; requests ahead of that one lost their
    /// replies. Asked nicks that are not listed are offline. A reply no
    /// request covers, such as a user's own ISON, only reports presence.
    pub fn handle_ison(&mut self, server: ServerId, online: &[String]) -> Vec<NotifyAction> {
        let asked = self.ison_pending.get_mut(&server).and_then(|pending| {
            let pos = pending
                .iter()
                .position(|batch| online.iter().all(|o| batch.iter().any(|n| irc_eq(n, o))))?;
            pending.drain(..pos);
            pending.pop_front()
        });
        let mut actions = Vec::new();
        match asked {
            Some(asked) => {
                for nick in asked {
                    let up = online.iter().any(|o| irc_eq(o, &nick));
                    actions.extend(self.transition(server, &nick, up));
                }
            }
            None => {
                debug!(%server, "unsolicited ISON reply");
                for nick in online {
                    actions.extend(self.transition(server, nick, true));
                }
            }
        }
        actions
    }

    pub fn handle_online(&mut self, server: ServerId, nick: &str) -> Option<NotifyAction> {
        self.transition(server, nick, true)
    }

    pub fn handle_offline(&mut self, server: ServerId, nick: &str) -> Option<NotifyAction> {
        self.transition(server, nick, false)
    }

    /// A watched nick quit: offline without waiting for the next poll.
    pub fn handle_quit(&mut self, server: ServerId, nick: &str) -> Option<NotifyAction> {
        let online = self
            .find(nick)
            .and_then(|e| e.per_server.get(&server))
            .is_some_and(|p| p.online);
        if online {
            self.transition(server, nick, false)
        } else {
            None
        }
    }

    fn transition(&mut self, server: ServerId, nick: &str, online: bool) -> Option<NotifyAction> {
        let entry = self.find_mut(nick)?;
        let now = Local::now();
        let presence = entry.per_server.entry(server).or_default();
        presence.known = true;
        if online {
            presence.last_seen = Some(now);
            if presence.online {
                return None;
            }
            presence.online = true;
            presence.last_on = Some(now);
            Some(NotifyAction::Online {
                server,
                nick: entry.nick.clone(),
            })
        } else {
            if !presence.online {
                // unknown → offline is silent
                return None;
            }
            presence.online = false;
            presence.last_off = Some(now);
            Some(NotifyAction::Offline {
                server,
                nick: entry.nick.clone(),
            })
        }
    }

    /// Forget everything learned from a server that went away.
    pub fn server_disconnected(&mut self, server: ServerId) {
        self.ison_pending.remove(&server);
        for entry in &mut self.entries {
            entry.per_server.remove(&server);
        }
    }

    /// Drop per-server state for servers that no longer exist.
    pub fn cleanup(&mut self, live: &[ServerId]) {
        self.ison_pending.retain(|id, _| live.contains(id));
        for entry in &mut self.entries {
            entry.per_server.retain(|id, _| live.contains(id));
        }
    }

    /// One line per entry for `/notify` with no arguments.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                let state = if e.is_online() { "online" } else { "offline" };
                let seen = e
                    .per_server
                    .values()
                    .filter_map(|p| p.last_seen)
                    .max()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_owned());
                let nets = if e.networks.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", e.networks.join(","))
                };
                format!("  {:<16} {:<8} last seen: {}{}", e.nick, state, seen, nets)
            })
            .collect()
    }
}

/// Join `items` after `head` into lines no longer than `max` bytes.
fn pack(head: &str, items: &[&str], sep: &str, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::from(head);
    for item in items {
        let fresh = line.len() == head.len();
        if !fresh && line.len() + sep.len() + item.len() > max {
            lines.push(std::mem::replace(&mut line, String::from(head)));
        }
        if line.len() != head.len() {
            line.push_str(sep);
        }
        line.push_str(item);
    }
    if line.len() > head.len() {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::Prefs;

    fn server(id: u32) -> Server {
        Server::new(ServerId(id), "irc.example.net", 6667, false, None, &Prefs::default())
    }

    #[test]
    fn test_transitions() {
        let mut engine = NotifyEngine::new();
        engine.add("Bob", Vec::new());
        let s = ServerId(1);

        // unknown → offline is silent
        assert_eq!(engine.handle_offline(s, "bob"), None);
        assert_eq!(
            engine.handle_online(s, "BOB"),
            Some(NotifyAction::Online { server: s, nick: "Bob".into() })
        );
        assert_eq!(engine.handle_online(s, "bob"), None);
        assert_eq!(
            engine.handle_quit(s, "bob"),
            Some(NotifyAction::Offline { server: s, nick: "Bob".into() })
        );
        assert_eq!(engine.handle_quit(s, "bob"), None);
        assert_eq!(engine.handle_online(s, "stranger"), None);
    }

    #[test]
    fn test_ison_fifo() {
        let mut engine = NotifyEngine::new();
        engine.add("alice", Vec::new());
        engine.add("bob", Vec::new());
        let srv = server(1);

        let lines = engine.tick(&srv);
        assert_eq!(lines, vec!["ISON alice bob"]);
        let actions = engine.handle_ison(srv.id, &["alice".to_owned()]);
        assert_eq!(actions.len(), 1);

        engine.tick(&srv);
        let actions = engine.handle_ison(srv.id, &[]);
        assert_eq!(
            actions,
            vec![NotifyAction::Offline { server: srv.id, nick: "alice".into() }]
        );
    }

    #[test]
    fn test_ison_unsolicited_reply_keeps_pending() {
        let mut engine = NotifyEngine::new();
        engine.add("alice", Vec::new());
        engine.add("bob", Vec::new());
        let srv = server(1);

        engine.tick(&srv);
        engine.handle_ison(srv.id, &["bob".to_owned()]);

        engine.tick(&srv);
        // someone typed /quote ISON carol
        assert!(engine.handle_ison(srv.id, &["carol".to_owned()]).is_empty());
        let actions = engine.handle_ison(srv.id, &["alice".to_owned(), "BOB".to_owned()]);
        assert_eq!(
            actions,
            vec![NotifyAction::Online { server: srv.id, nick: "alice".into() }]
        );
        assert!(engine.ison_pending[&srv.id].is_empty());
    }

    #[test]
    fn test_ison_lines_bounded() {
        let mut engine = NotifyEngine::new();
        for i in 0..100 {
            engine.add(&format!("nickname{:03}", i), Vec::new());
        }
        let lines = engine.tick(&server(1));
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= ISON_LINE_MAX));
        let total: usize = lines.iter().map(|l| l.split(' ').count() - 1).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_monitor_preferred_and_limited() {
        let mut engine = NotifyEngine::new();
        for nick in ["a", "b", "c"] {
            engine.add(nick, Vec::new());
        }
        let mut srv = server(1);
        srv.caps.supports_watch = true;
        assert_eq!(engine.on_login(&srv), vec!["WATCH +a +b +c"]);

        srv.caps.supports_monitor = true;
        srv.caps.monitor_limit = Some(2);
        assert_eq!(engine.on_login(&srv), vec!["MONITOR + a,b"]);
        assert!(engine.tick(&srv).is_empty());
    }

    #[test]
    fn test_network_restriction() {
        let mut engine = NotifyEngine::parse("alice\nbob Libera,OFTC\n");
        let mut srv = server(1);
        srv.network_name = Some("EFnet".into());
        assert_eq!(engine.tick(&srv), vec!["ISON alice"]);
        assert_eq!(engine.to_text(), "alice\nbob Libera,OFTC\n");
    }

    #[test]
    fn test_cleanup_drops_dead_servers() {
        let mut engine = NotifyEngine::new();
        engine.add("bob", Vec::new());
        engine.handle_online(ServerId(1), "bob");
        engine.handle_online(ServerId(2), "bob");
        engine.cleanup(&[ServerId(2)]);
        let entry = engine.find("bob").unwrap();
        assert!(!entry.per_server.contains_key(&ServerId(1)));
        assert!(entry.is_online());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.conf");
        let mut engine = NotifyEngine::new();
        engine.add("carol", vec!["Libera".into()]);
        engine.save(&path).unwrap();
        let loaded = NotifyEngine::load(&path).unwrap();
        assert_eq!(loaded.find("CAROL").unwrap().networks, vec!["Libera"]);
    }
}
