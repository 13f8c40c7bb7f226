//! Coalescing of `+o`/`-o`/`+v`/`-v` notifications.

use slirc_proto::Casemapping;

use super::ModeEvent;

/// Nicks collected since the last flush, one list per sign and letter.
#[derive(Debug, Default)]
pub struct ModeBatch {
    op: Vec<String>,
    deop: Vec<String>,
    voice: Vec<String>,
    devoice: Vec<String>,
}

impl ModeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. Returns `false` for letters that are not batched.
    pub fn push(&mut self, casemap: Casemapping, sign: char, letter: char, nick: &str) -> bool {
        let list = match (sign, letter) {
            ('+', 'o') => &mut self.op,
            ('-', 'o') => &mut self.deop,
            ('+', 'v') => &mut self.voice,
            ('-', 'v') => &mut self.devoice,
            _ => return false,
        };
        if !list.iter().any(|n| casemap.equals(n, nick)) {
            list.push(nick.to_owned());
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.op.is_empty() && self.deop.is_empty() && self.voice.is_empty() && self.devoice.is_empty()
    }

    /// Emit one event per non-empty list and reset.
    pub fn flush(&mut self, setter: &str, channel: &str, out: &mut Vec<ModeEvent>) {
        let make = |nicks: Vec<String>| (setter.to_owned(), channel.to_owned(), nicks);
        if !self.op.is_empty() {
            let (setter, channel, nicks) = make(std::mem::take(&mut self.op));
            out.push(ModeEvent::Op { setter, channel, nicks });
        }
        if !self.deop.is_empty() {
            let (setter, channel, nicks) = make(std::mem::take(&mut self.deop));
            out.push(ModeEvent::Deop { setter, channel, nicks });
        }
        if !self.voice.is_empty() {
            let (setter, channel, nicks) = make(std::mem::take(&mut self.voice));
            out.push(ModeEvent::Voice { setter, channel, nicks });
        }
        if !self.devoice.is_empty() {
            let (setter, channel, nicks) = make(std::mem::take(&mut self.devoice));
            out.push(ModeEvent::Devoice { setter, channel, nicks });
        }
    }
}
