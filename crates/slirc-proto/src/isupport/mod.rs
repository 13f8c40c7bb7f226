//! ISUPPORT (`RPL_ISUPPORT`, numeric 005) token parsing.
//!
//! # Example
//!
//! ```
//! use slirc_proto::isupport::{ChanModes, ChanModeClass, PrefixSpec};
//!
//! let modes = ChanModes::parse("beI,k,l,imnpst");
//! assert_eq!(modes.class('k'), Some(ChanModeClass::B));
//!
//! let prefix = PrefixSpec::parse("(qaohv)~&@%+").unwrap();
//! assert_eq!(prefix.prefix_for('o'), Some('@'));
//! ```

use std::fmt;

/// Default `CHANMODES` before the server sends 005.
pub const DEFAULT_CHANMODES: &str = "beI,k,l,imnpst";
/// Default `PREFIX` before the server sends 005.
pub const DEFAULT_PREFIX: &str = "(ohv)@%+";
/// Default `CHANTYPES` before the server sends 005.
pub const DEFAULT_CHANTYPES: &str = "#&!+";

/// One 005 token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsupportToken<'a> {
    /// `KEY` or `KEY=VALUE`.
    Set(&'a str, Option<&'a str>),
    /// `-KEY`: the server withdrew a previously advertised feature.
    Unset(&'a str),
}

impl<'a> IsupportToken<'a> {
    /// Parse one token.
    pub fn parse(token: &'a str) -> Self {
        if let Some(key) = token.strip_prefix('-') {
            return IsupportToken::Unset(key);
        }
        match token.split_once('=') {
            Some((key, value)) => IsupportToken::Set(key, Some(value)),
            None => IsupportToken::Set(token, None),
        }
    }
}

/// Tokens of a 005 reply: skips the target nick and the trailing
/// human-readable text.
pub fn tokens(params: &[String]) -> impl Iterator<Item = IsupportToken<'_>> {
    let mut body = params.get(1..).unwrap_or_default();
    if let Some(last) = body.last() {
        if last.contains(' ') {
            body = &body[..body.len() - 1];
        }
    }
    body.iter().map(|t| IsupportToken::parse(t))
}

/// RFC parameter class of a channel mode letter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChanModeClass {
    /// List modes; always take an argument.
    A,
    /// Always take an argument.
    B,
    /// Take an argument only when set.
    C,
    /// Never take an argument.
    D,
}

/// The four `CHANMODES` classes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanModes {
    /// Class A letters.
    pub list: String,
    /// Class B letters.
    pub always: String,
    /// Class C letters.
    pub on_set: String,
    /// Class D letters.
    pub never: String,
}

impl ChanModes {
    /// Parse a `CHANMODES=` value. Missing groups are empty; groups past
    /// the fourth are ignored.
    pub fn parse(value: &str) -> Self {
        let mut groups = value.split(',');
        let mut next = || groups.next().unwrap_or("").to_owned();
        ChanModes {
            list: next(),
            always: next(),
            on_set: next(),
            never: next(),
        }
    }

    /// Class of a letter, if listed.
    pub fn class(&self, letter: char) -> Option<ChanModeClass> {
        if self.list.contains(letter) {
            Some(ChanModeClass::A)
        } else if self.always.contains(letter) {
            Some(ChanModeClass::B)
        } else if self.on_set.contains(letter) {
            Some(ChanModeClass::C)
        } else if self.never.contains(letter) {
            Some(ChanModeClass::D)
        } else {
            None
        }
    }

    /// Whether any class lists the letter.
    pub fn contains(&self, letter: char) -> bool {
        self.class(letter).is_some()
    }
}

impl Default for ChanModes {
    fn default() -> Self {
        ChanModes::parse(DEFAULT_CHANMODES)
    }
}

impl fmt::Display for ChanModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.list, self.always, self.on_set, self.never)
    }
}

/// `PREFIX=(modes)prefixes`, most privileged first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixSpec {
    /// Privilege mode letters, e.g. `ohv`.
    pub modes: String,
    /// Matching prefix characters, e.g. `@%+`.
    pub prefixes: String,
}

impl PrefixSpec {
    /// Parse a `PREFIX=` value. Returns `None` if the two halves differ in
    /// length or the parentheses are missing. An empty value is valid and
    /// means no privilege modes.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return Some(PrefixSpec {
                modes: String::new(),
                prefixes: String::new(),
            });
        }
        let rest = value.strip_prefix('(')?;
        let (modes, prefixes) = rest.split_once(')')?;
        if modes.chars().count() != prefixes.chars().count() {
            return None;
        }
        Some(PrefixSpec {
            modes: modes.to_owned(),
            prefixes: prefixes.to_owned(),
        })
    }

    /// Rank of a mode letter (0 = most privileged).
    pub fn rank_of_mode(&self, mode: char) -> Option<usize> {
        self.modes.chars().position(|c| c == mode)
    }

    /// Rank of a prefix character.
    pub fn rank_of_prefix(&self, prefix: char) -> Option<usize> {
        self.prefixes.chars().position(|c| c == prefix)
    }

    /// Prefix character for a mode letter.
    pub fn prefix_for(&self, mode: char) -> Option<char> {
        self.rank_of_mode(mode)
            .and_then(|i| self.prefixes.chars().nth(i))
    }

    /// Mode letter for a prefix character.
    pub fn mode_for(&self, prefix: char) -> Option<char> {
        self.rank_of_prefix(prefix).and_then(|i| self.modes.chars().nth(i))
    }
}

impl Default for PrefixSpec {
    fn default() -> Self {
        PrefixSpec {
            modes: "ohv".to_owned(),
            prefixes: "@%+".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(line: &[&str]) -> Vec<String> {
        line.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_tokens_skip_nick_and_trailing() {
        let p = params(&["me", "NETWORK=Test", "-WATCH", "EXCEPTS", "are supported by this server"]);
        let toks: Vec<_> = tokens(&p).collect();
        assert_eq!(
            toks,
            vec![
                IsupportToken::Set("NETWORK", Some("Test")),
                IsupportToken::Unset("WATCH"),
                IsupportToken::Set("EXCEPTS", None),
            ]
        );
    }

    #[test]
    fn test_chanmodes_classes() {
        let cm = ChanModes::parse("beIq,k,flj,CFLMPQcgimnprstz");
        assert_eq!(cm.class('q'), Some(ChanModeClass::A));
        assert_eq!(cm.class('k'), Some(ChanModeClass::B));
        assert_eq!(cm.class('l'), Some(ChanModeClass::C));
        assert_eq!(cm.class('m'), Some(ChanModeClass::D));
        assert_eq!(cm.class('o'), None);
    }

    #[test]
    fn test_chanmodes_short_value() {
        let cm = ChanModes::parse("b");
        assert_eq!(cm.always, "");
        assert_eq!(cm.to_string(), "b,,,");
    }

    #[test]
    fn test_prefix_spec() {
        let p = PrefixSpec::parse("(qaohv)~&@%+").unwrap();
        assert_eq!(p.rank_of_mode('q'), Some(0));
        assert_eq!(p.mode_for('%'), Some('h'));
        assert!(PrefixSpec::parse("(ov)@").is_none());
        assert!(PrefixSpec::parse("ov@+").is_none());
    }
}
