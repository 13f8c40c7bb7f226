//! IRC case-mapping functions.
//!
//! IRC uses a special case-insensitive comparison where some characters
//! are considered equivalent (e.g., `[` and `{`). The active mapping is
//! advertised by the server in `CASEMAPPING=`.

/// Case mapping advertised by a server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Casemapping {
    /// `rfc1459`: ASCII plus `[]\~` ↔ `{}|^`.
    #[default]
    Rfc1459,
    /// `strict-rfc1459`: ASCII plus `[]\` ↔ `{}|`.
    StrictRfc1459,
    /// `ascii`: only `A-Z`.
    Ascii,
}

impl Casemapping {
    /// Parse a `CASEMAPPING=` value. Unknown names fall back to `rfc1459`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ascii" => Self::Ascii,
            "strict-rfc1459" => Self::StrictRfc1459,
            _ => Self::Rfc1459,
        }
    }

    /// Lowercase one character.
    #[inline]
    pub const fn lower_char(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => (c as u8 + 32) as char,
            (Self::Ascii, _) => c,
            (_, '[') => '{',
            (_, ']') => '}',
            (_, '\\') => '|',
            (Self::Rfc1459, '~') => '^',
            _ => c,
        }
    }

    /// Lowercase a string.
    pub fn to_lower(self, s: &str) -> String {
        s.chars().map(|c| self.lower_char(c)).collect()
    }

    /// Case-insensitive equality.
    pub fn equals(self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.chars()
                .zip(b.chars())
                .all(|(ca, cb)| self.lower_char(ca) == self.lower_char(cb))
    }
}

/// Convert a string to IRC lowercase using RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    Casemapping::Rfc1459.to_lower(s)
}

/// Compare two strings using RFC 1459 case-insensitive comparison.
pub fn irc_eq(a: &str, b: &str) -> bool {
    Casemapping::Rfc1459.equals(a, b)
}
