//! IRC message type, parsing and serialization.

mod parse;
mod tags;

use std::fmt;
use std::str::FromStr;

pub use self::tags::{escape_tag_value, unescape_tag_value};
use crate::error::{MessageParseError, ProtocolError};
use crate::prefix::Prefix;

/// One IRCv3 message tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag(pub String, pub Option<String>);

/// An owned IRC message.
///
/// Commands are kept as upper-cased strings (numerics stay as their three
/// digits); parameters include the trailing parameter as the last entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message tags, if any.
    pub tags: Vec<Tag>,
    /// Message source.
    pub prefix: Option<Prefix>,
    /// Command or numeric.
    pub command: String,
    /// Parameters, trailing included.
    pub params: Vec<String>,
}

impl Message {
    /// Build a message from a command and parameters.
    pub fn new<S: Into<String>>(command: &str, params: impl IntoIterator<Item = S>) -> Self {
        Message {
            tags: Vec::new(),
            prefix: None,
            command: command.to_ascii_uppercase(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// `PRIVMSG target :text`.
    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    /// `NOTICE target :text`.
    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE", [target, text])
    }

    /// Parameter `idx`, if present.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Last parameter, if present.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Nickname of the source, when the source is a user.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// Value of a tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.0 == key)
            .and_then(|t| t.1.as_deref())
    }

    /// Numeric reply code when the command is three digits.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage {
                string: s.to_owned(),
                cause: MessageParseError::EmptyMessage,
            });
        }

        let parsed = parse::parse_message(line).map_err(|cause| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause,
        })?;

        let tags = parsed.tags.map(tags::parse_tags).unwrap_or_default();

        Ok(Message {
            tags,
            prefix: parsed.prefix.map(Prefix::parse),
            command: parsed.command.to_ascii_uppercase(),
            params: parsed.params.iter().map(|p| (*p).to_owned()).collect(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        tags::write_tags(f, &self.tags)?;

        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        f.write_str(&self.command)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let msg: Message = ":nick!u@h PRIVMSG #chan :hello world\r\n".parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hello world"]);
        assert_eq!(msg.source_nick(), Some("nick"));
    }

    #[test]
    fn test_parse_numeric_and_tags() {
        let msg: Message = "@time=2024-01-01T00:00:00Z;account=bob :srv.net 005 me CHANMODES=b,k,l,imnpst :are supported"
            .parse()
            .unwrap();
        assert_eq!(msg.numeric(), Some(5));
        assert_eq!(msg.tag("account"), Some("bob"));
        assert_eq!(msg.param(1), Some("CHANMODES=b,k,l,imnpst"));
    }

    #[test]
    fn test_lowercase_command_normalised() {
        let msg: Message = "ping :abc".parse().unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn test_empty_is_error() {
        assert!("\r\n".parse::<Message>().is_err());
    }

    #[test]
    fn test_display_trailing_colon_only_when_needed() {
        assert_eq!(Message::new("MODE", ["#c", "+o", "bob"]).to_string(), "MODE #c +o bob");
        assert_eq!(Message::privmsg("#c", "hi there").to_string(), "PRIVMSG #c :hi there");
        assert_eq!(Message::new("TOPIC", ["#c", ""]).to_string(), "TOPIC #c :");
    }
}
