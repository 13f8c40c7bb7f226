//! Mode engine.
//!
//! Interprets `MODE` lines and the 324 reply against the tables a server
//! advertised in 005, updates the channel's user privileges and mode
//! string, and produces [`ModeEvent`]s for display.
//!
//! Argument consumption follows the CHANMODES classes: privilege letters
//! and classes A/B always take an argument, class C only when set, class D
//! never. Servers that do not follow this are common enough that a line
//! with exactly one argument per letter is read as every letter taking
//! one. That heuristic is imprecise for a conformant server whose counts
//! happen to match, and is kept for compatibility.

mod batch;
mod isupport;

pub use batch::ModeBatch;

use std::fmt;

use slirc_proto::{Casemapping, ChanModeClass, ChanModes, PrefixSpec};
use tracing::debug;

use crate::server::Session;

/// The per-server tables a mode line is read against.
#[derive(Clone, Copy, Debug)]
pub struct ModeTables<'a> {
    pub chanmodes: &'a ChanModes,
    pub prefix: &'a PrefixSpec,
    pub casemap: Casemapping,
}

/// A human-readable mode change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeEvent {
    Op { setter: String, channel: String, nicks: Vec<String> },
    Deop { setter: String, channel: String, nicks: Vec<String> },
    Voice { setter: String, channel: String, nicks: Vec<String> },
    Devoice { setter: String, channel: String, nicks: Vec<String> },
    HalfOp { setter: String, channel: String, nick: String },
    DeHalfOp { setter: String, channel: String, nick: String },
    /// Any other `PREFIX` letter (owner, admin, ...).
    Privilege { setter: String, channel: String, sign: char, letter: char, nick: String },
    Key { setter: String, channel: String, key: Option<String> },
    Limit { setter: String, channel: String, limit: Option<u32> },
    Ban { setter: String, channel: String, mask: String, set: bool },
    Exempt { setter: String, channel: String, mask: String, set: bool },
    Invite { setter: String, channel: String, mask: String, set: bool },
    Quiet { setter: String, channel: String, mask: String, set: bool },
    Generic { setter: String, channel: String, sign: char, letter: char, arg: Option<String> },
    UserMode { setter: String, target: String, modes: String },
}

impl fmt::Display for ModeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModeEvent::*;
        let on_off = |set: bool| if set { "sets" } else { "removes" };
        match self {
            Op { setter, nicks, .. } => {
                write!(f, "* {} gives channel operator status to {}", setter, nicks.join(" "))
            }
            Deop { setter, nicks, .. } => {
                write!(f, "* {} removes channel operator status from {}", setter, nicks.join(" "))
            }
            Voice { setter, nicks, .. } => write!(f, "* {} gives voice to {}", setter, nicks.join(" ")),
            Devoice { setter, nicks, .. } => {
                write!(f, "* {} removes voice from {}", setter, nicks.join(" "))
            }
            HalfOp { setter, nick, .. } => {
                write!(f, "* {} gives channel half-operator status to {}", setter, nick)
            }
            DeHalfOp { setter, nick, .. } => {
                write!(f, "* {} removes channel half-operator status from {}", setter, nick)
            }
            Privilege { setter, sign, letter, nick, .. } => {
                write!(f, "* {} sets mode {}{} on {}", setter, sign, letter, nick)
            }
            Key { setter, key: Some(key), .. } => write!(f, "* {} sets channel keyword to {}", setter, key),
            Key { setter, key: None, .. } => write!(f, "* {} removes channel keyword", setter),
            Limit { setter, limit: Some(limit), .. } => {
                write!(f, "* {} sets channel limit to {}", setter, limit)
            }
            Limit { setter, limit: None, .. } => write!(f, "* {} removes user limit", setter),
            Ban { setter, mask, set, .. } => write!(f, "* {} {} ban on {}", setter, on_off(*set), mask),
            Exempt { setter, mask, set, .. } => {
                write!(f, "* {} {} exempt on {}", setter, on_off(*set), mask)
            }
            Invite { setter, mask, set, .. } => {
                write!(f, "* {} {} invite exempt on {}", setter, on_off(*set), mask)
            }
            Quiet { setter, mask, set, .. } => write!(f, "* {} {} quiet on {}", setter, on_off(*set), mask),
            Generic { setter, channel, sign, letter, arg: Some(arg) } => {
                write!(f, "* {} sets mode {}{} {} on {}", setter, sign, letter, arg, channel)
            }
            Generic { setter, channel, sign, letter, arg: None } => {
                write!(f, "* {} sets mode {}{} on {}", setter, sign, letter, channel)
            }
            UserMode { setter, target, modes } => {
                write!(f, "* {} sets mode {} on {}", setter, modes, target)
            }
        }
    }
}

impl ModeTables<'_> {
    fn is_privilege(&self, letter: char) -> bool {
        self.prefix.rank_of_mode(letter).is_some()
    }

    /// Whether `letter` consumes an argument under the CHANMODES rules.
    pub fn takes_arg(&self, sign: char, letter: char) -> bool {
        if self.is_privilege(letter) {
            return true;
        }
        match self.chanmodes.class(letter) {
            Some(ChanModeClass::A | ChanModeClass::B) => true,
            Some(ChanModeClass::C) => sign == '+',
            Some(ChanModeClass::D) | None => false,
        }
    }

    /// `q` is a quiet list only when CHANMODES lists it and it is not
    /// claimed by PREFIX.
    fn q_is_quiet(&self) -> bool {
        self.chanmodes.contains('q') && !self.is_privilege('q')
    }
}

/// One letter with its sign and, if it took one, its argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    pub sign: char,
    pub letter: char,
    pub arg: Option<String>,
}

/// Split a mode string and its arguments into changes.
pub fn parse_changes(tables: &ModeTables<'_>, modes: &str, args: &[String]) -> Vec<ModeChange> {
    let letters = modes.chars().filter(|c| *c != '+' && *c != '-').count();
    let all_take_args = letters > 0 && args.len() == letters;
    let mut args = args.iter();
    let mut sign = '+';
    let mut out = Vec::with_capacity(letters);
    for c in modes.chars() {
        match c {
            '+' | '-' => sign = c,
            letter => {
                let arg = if all_take_args || tables.takes_arg(sign, letter) {
                    args.next().cloned()
                } else {
                    None
                };
                out.push(ModeChange { sign, letter, arg });
            }
        }
    }
    out
}

/// Interpret a channel `MODE` line, updating `session` if we have one.
/// Batched privilege notifications are flushed at each sign character and
/// at the end.
pub fn handle_mode(
    tables: &ModeTables<'_>,
    mut session: Option<&mut Session>,
    setter: &str,
    channel: &str,
    modes: &str,
    args: &[String],
) -> Vec<ModeEvent> {
    let changes = parse_changes(tables, modes, args);
    let mut out = Vec::new();
    let mut batch = ModeBatch::new();
    let mut changes = changes.into_iter();

    for c in modes.chars() {
        if c == '+' || c == '-' {
            batch.flush(setter, channel, &mut out);
            continue;
        }
        let Some(change) = changes.next() else {
            break;
        };
        let sign = change.sign;
        let set = sign == '+';
        let letter = change.letter;

        if tables.is_privilege(letter) {
            let Some(nick) = change.arg else {
                debug!(channel, %letter, "privilege mode without a nick");
                continue;
            };
            if let Some(session) = session.as_deref_mut() {
                session.set_access(&nick, letter, set);
            }
            if batch.push(tables.casemap, sign, letter, &nick) {
                continue;
            }
            let (setter, channel) = (setter.to_owned(), channel.to_owned());
            out.push(match (letter, set) {
                ('h', true) => ModeEvent::HalfOp { setter, channel, nick },
                ('h', false) => ModeEvent::DeHalfOp { setter, channel, nick },
                _ => ModeEvent::Privilege { setter, channel, sign, letter, nick },
            });
            continue;
        }

        let class = tables.chanmodes.class(letter);
        if let Some(session) = session.as_deref_mut() {
            if class != Some(ChanModeClass::A) {
                record_chan_mode(session, sign, letter, change.arg.as_deref());
            }
        }

        let (setter, channel) = (setter.to_owned(), channel.to_owned());
        let event = match (letter, change.arg) {
            ('k', key) => {
                if let Some(session) = session.as_deref_mut() {
                    session.key = if set { key.clone() } else { None };
                }
                ModeEvent::Key { setter, channel, key: if set { key } else { None } }
            }
            ('l', arg) => {
                let limit = if set { arg.and_then(|a| a.parse().ok()) } else { None };
                if let Some(session) = session.as_deref_mut() {
                    session.limit = limit;
                }
                ModeEvent::Limit { setter, channel, limit }
            }
            ('b', Some(mask)) => ModeEvent::Ban { setter, channel, mask, set },
            ('e', Some(mask)) => ModeEvent::Exempt { setter, channel, mask, set },
            ('I', Some(mask)) => ModeEvent::Invite { setter, channel, mask, set },
            ('q', Some(mask)) if tables.q_is_quiet() => ModeEvent::Quiet { setter, channel, mask, set },
            (letter, arg) => ModeEvent::Generic { setter, channel, sign, letter, arg },
        };
        out.push(event);
    }
    batch.flush(setter, channel, &mut out);
    out
}

/// Apply a 324 reply: the mode string is replaced wholesale and key and
/// limit are set without notification.
pub fn handle_324(tables: &ModeTables<'_>, session: &mut Session, modes: &str, args: &[String]) {
    session.mode_list.clear();
    session.key = None;
    session.limit = None;
    for change in parse_changes(tables, modes, args) {
        if change.sign != '+' || tables.is_privilege(change.letter) {
            continue;
        }
        if tables.chanmodes.class(change.letter) == Some(ChanModeClass::A) {
            continue;
        }
        match change.letter {
            'k' => session.key = change.arg.clone(),
            'l' => session.limit = change.arg.as_deref().and_then(|a| a.parse().ok()),
            _ => {}
        }
        record_chan_mode(session, '+', change.letter, change.arg.as_deref());
    }
}

/// Keep the session's mode list in step with one change. Setting an
/// existing letter replaces its argument in place; removing drops the
/// letter and its argument.
pub fn record_chan_mode(session: &mut Session, sign: char, letter: char, arg: Option<&str>) {
    let existing = session.mode_list.iter().position(|(l, _)| *l == letter);
    match (sign, existing) {
        ('+', Some(idx)) => session.mode_list[idx].1 = arg.map(str::to_owned),
        ('+', None) => session.mode_list.push((letter, arg.map(str::to_owned))),
        ('-', Some(idx)) => {
            session.mode_list.remove(idx);
        }
        _ => {}
    }
}

/// A `MODE` aimed at a nick rather than a channel.
pub fn user_mode_event(setter: &str, target: &str, modes: &str, args: &[String]) -> ModeEvent {
    let mut text = modes.to_owned();
    for arg in args {
        text.push(' ');
        text.push_str(arg);
    }
    ModeEvent::UserMode {
        setter: setter.to_owned(),
        target: target.to_owned(),
        modes: text,
    }
}

/// Group `(sign, letter, arg)` changes into `MODE` lines of at most
/// `per_line` parameterised changes each.
pub fn build_mode_lines(channel: &str, sign: char, letter: char, nicks: &[&str], per_line: usize) -> Vec<String> {
    nicks
        .chunks(per_line.max(1))
        .map(|chunk| {
            let letters: String = std::iter::repeat_n(letter, chunk.len()).collect();
            format!("MODE {} {}{} {}", channel, sign, letters, chunk.join(" "))
        })
        .collect()
}
