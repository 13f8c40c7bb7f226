//! Error types for the protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The invalid message string.
        string: String,
        /// Why it was rejected.
        #[source]
        cause: MessageParseError,
    },

    /// Malformed DCC request.
    #[error("invalid DCC request: {0}")]
    Dcc(#[from] DccParseError),

    /// Unknown charset label.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Reasons a line fails to parse as an IRC message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageParseError {
    /// Empty line.
    #[error("empty message")]
    EmptyMessage,

    /// Command was missing or not `1*letter / 3digit`.
    #[error("invalid command at byte {position}")]
    InvalidCommand {
        /// Byte offset where parsing stopped.
        position: usize,
    },

    /// Prefix present but empty.
    #[error("invalid prefix")]
    InvalidPrefix,
}

/// Reasons a CTCP DCC payload is rejected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DccParseError {
    /// The CTCP body does not begin with `DCC`.
    #[error("not a DCC request")]
    NotDcc,

    /// Sub-command other than SEND/CHAT/RESUME/ACCEPT.
    #[error("unsupported DCC type {0:?}")]
    UnknownType(String),

    /// Too few arguments for the sub-command.
    #[error("missing {0}")]
    Missing(&'static str),

    /// Numeric field that does not parse.
    #[error("bad {field}: {value:?}")]
    BadNumber {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// Address that is neither a decimal IPv4 nor a textual IPv6.
    #[error("bad address {0:?}")]
    BadAddress(String),

    /// Quoted filename without closing quote.
    #[error("unterminated filename")]
    UnterminatedName,
}
