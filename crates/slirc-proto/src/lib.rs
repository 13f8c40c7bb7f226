//! # slirc-proto
//!
//! Protocol primitives used by the slirc client engine.
//!
//! ## Features
//!
//! - IRC message parsing and serialization (tags, prefixes, parameters)
//! - RFC 1459 / ASCII case mapping
//! - ISUPPORT (`RPL_ISUPPORT`, numeric 005) token parsing
//! - CTCP framing and the DCC `SEND`/`CHAT`/`RESUME`/`ACCEPT` sub-protocol
//! - A bounded, truncating line codec with charset fallback decoding
//! - SASL PLAIN/EXTERNAL payload helpers
//!
//! ## Quick Start
//!
//! ```rust
//! use slirc_proto::Message;
//!
//! let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.source_nick(), Some("nick"));
//! assert_eq!(msg.to_string(), ":nick!user@host PRIVMSG #channel :Hello!");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod ctcp;
pub mod dcc;
pub mod error;
pub mod isupport;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod prefix;
pub mod sasl;

pub use self::casemap::{irc_eq, irc_to_lower, Casemapping};
pub use self::ctcp::{Ctcp, CtcpKind};
pub use self::dcc::{DccAddr, DccRequest};
pub use self::error::{DccParseError, MessageParseError, ProtocolError};
pub use self::isupport::{ChanModeClass, ChanModes, IsupportToken, PrefixSpec};
#[cfg(feature = "tokio")]
pub use self::line::{decode_line, Line, LineCodec, DEFAULT_LINE_CAPACITY};
pub use self::message::{Message, Tag};
pub use self::prefix::Prefix;
pub use self::sasl::SaslMechanism;

/// Re-exported charset type and the default charset.
pub use encoding::{Encoding, UTF_8};

/// Look up a charset by its WHATWG label (`utf-8`, `iso-8859-1`, `cp1251`, ...).
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}
