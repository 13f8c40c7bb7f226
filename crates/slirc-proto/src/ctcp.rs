//! CTCP (Client-to-Client Protocol) framing.
//!
//! CTCP payloads ride inside PRIVMSG (requests) and NOTICE (replies),
//! delimited by `\x01`.
//!
//! ```
//! use slirc_proto::ctcp::{Ctcp, CtcpKind};
//!
//! let ctcp = Ctcp::parse("\x01DCC SEND file.txt 0 0 10 7\x01").unwrap();
//! assert_eq!(ctcp.kind, CtcpKind::Dcc);
//! assert_eq!(ctcp.params, Some("SEND file.txt 0 0 10 7"));
//! assert_eq!(Ctcp::new(CtcpKind::Version, None).to_string(), "\x01VERSION\x01");
//! ```

use std::fmt;

/// The CTCP delimiter character.
pub const CTCP_DELIM: char = '\x01';

/// Commands this client answers to, for CLIENTINFO replies.
pub const SUPPORTED: &str = "ACTION CLIENTINFO DCC PING TIME VERSION";

/// CTCP command names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CtcpKind {
    /// `/me` text.
    Action,
    /// Client version request or reply.
    Version,
    /// Round-trip check; the reply echoes the argument.
    Ping,
    /// Local time request or reply.
    Time,
    /// List of supported commands.
    Clientinfo,
    /// Direct client connection negotiation.
    Dcc,
    /// Anything else.
    Unknown(String),
}

impl CtcpKind {
    /// Parse a command name, case-insensitively.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "ACTION" => Self::Action,
            "VERSION" => Self::Version,
            "PING" => Self::Ping,
            "TIME" => Self::Time,
            "CLIENTINFO" => Self::Clientinfo,
            "DCC" => Self::Dcc,
            _ => Self::Unknown(name.to_ascii_uppercase()),
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Action => "ACTION",
            Self::Version => "VERSION",
            Self::Ping => "PING",
            Self::Time => "TIME",
            Self::Clientinfo => "CLIENTINFO",
            Self::Dcc => "DCC",
            Self::Unknown(s) => s,
        }
    }
}

impl fmt::Display for CtcpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CTCP payload borrowed from a message body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// Command.
    pub kind: CtcpKind,
    /// Everything after the command and one space.
    pub params: Option<&'a str>,
}

impl<'a> Ctcp<'a> {
    /// Build a payload.
    pub fn new(kind: CtcpKind, params: Option<&'a str>) -> Self {
        Ctcp { kind, params }
    }

    /// Parse a PRIVMSG/NOTICE body. A missing closing delimiter is tolerated.
    pub fn parse(text: &'a str) -> Option<Self> {
        let text = text.strip_prefix(CTCP_DELIM)?;
        let text = text.strip_suffix(CTCP_DELIM).unwrap_or(text);
        if text.is_empty() {
            return None;
        }

        let (command, params) = match text.split_once(' ') {
            Some((command, params)) if !params.is_empty() => (command, Some(params)),
            Some((command, _)) => (command, None),
            None => (text, None),
        };

        Some(Ctcp {
            kind: CtcpKind::parse(command),
            params,
        })
    }

    /// Whether a body is framed as CTCP.
    #[inline]
    pub fn is_ctcp(text: &str) -> bool {
        text.starts_with(CTCP_DELIM)
    }
}

impl fmt::Display for Ctcp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x01{}", self.kind)?;
        if let Some(params) = self.params {
            write!(f, " {}", params)?;
        }
        write!(f, "\x01")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        let ctcp = Ctcp::parse("\x01ACTION waves hello\x01").unwrap();
        assert_eq!(ctcp.kind, CtcpKind::Action);
        assert_eq!(ctcp.params, Some("waves hello"));
    }

    #[test]
    fn test_parse_without_params() {
        let ctcp = Ctcp::parse("\x01version\x01").unwrap();
        assert_eq!(ctcp.kind, CtcpKind::Version);
        assert_eq!(ctcp.params, None);
    }

    #[test]
    fn test_missing_trailing_delim() {
        let ctcp = Ctcp::parse("\x01PING 12345").unwrap();
        assert_eq!(ctcp.kind, CtcpKind::Ping);
        assert_eq!(ctcp.params, Some("12345"));
    }

    #[test]
    fn test_not_ctcp() {
        assert!(Ctcp::parse("hello").is_none());
        assert!(Ctcp::parse("\x01\x01").is_none());
    }

    #[test]
    fn test_unknown_kind_display() {
        let ctcp = Ctcp::parse("\x01finger\x01").unwrap();
        assert_eq!(ctcp.kind, CtcpKind::Unknown("FINGER".into()));
        assert_eq!(ctcp.to_string(), "\x01FINGER\x01");
    }
}
