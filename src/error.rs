//! Unified error handling for the client engine.
//!
//! Each subsystem has its own enum; `anyhow` is only used by the binary.

use std::io;

use thiserror::Error;

// ============================================================================
// Proxy traversal
// ============================================================================

/// Failures while tunnelling through a proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy i/o: {0}")]
    Io(#[from] io::Error),

    #[error("proxy handshake timed out")]
    Timeout,

    #[error("proxy host {0} did not resolve")]
    Resolve(String),

    #[error("SOCKS4 request rejected (code {0:#04x})")]
    Socks4Rejected(u8),

    #[error("SOCKS4 needs an IPv4 target")]
    Socks4NeedsIpv4,

    #[error("SOCKS5 proxy accepts none of our authentication methods")]
    Socks5NoMethod,

    #[error("SOCKS5 authentication failed")]
    Socks5AuthFailed,

    #[error("SOCKS5 connect failed (reply {0})")]
    Socks5Rejected(u8),

    #[error("unexpected proxy reply")]
    BadReply,

    #[error("HTTP proxy refused: {0}")]
    HttpStatus(String),
}

// ============================================================================
// Server connections
// ============================================================================

/// Failures while establishing an IRC connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unknown host {0}")]
    Resolve(String),

    #[error("connection timed out")]
    Timeout,

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("handshake timed out")]
    TlsTimeout,

    #[error("TLS: {0}")]
    Tls(String),

    #[error("invalid server name {0}")]
    ServerName(String),

    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),
}

impl ConnectError {
    /// Whether an auto-reconnect should follow this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::TlsTimeout | Self::Io(_) | Self::Proxy(_)
        )
    }
}

// ============================================================================
// DCC
// ============================================================================

/// Errors surfaced by DCC operations.
#[derive(Debug, Error)]
pub enum DccError {
    #[error("{0}: {1}")]
    File(String, #[source] io::Error),

    #[error("{0} is a directory")]
    IsDirectory(String),

    #[error("{0} is empty")]
    EmptyFile(String),

    #[error("no files match {0}")]
    NoMatch(String),

    #[error("bad wildcard pattern {0}")]
    Pattern(String),

    #[error("cannot listen for DCC: {0}")]
    Listen(#[source] io::Error),

    #[error("no DCC matches {0}")]
    NoSuchTransfer(String),

    #[error("DCC {0} is not resumable")]
    NotResumable(String),

    #[error("not connected to a server")]
    NotConnected,

    #[error("malformed DCC request from {nick}: {reason}")]
    Malformed { nick: String, reason: String },
}

// ============================================================================
// Commands
// ============================================================================

/// Errors from the command dispatcher.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not enough parameters for {0}")]
    NeedMoreParams(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("no such server {0}")]
    NoSuchServer(String),

    #[error("user command expansion exceeds {0} bytes")]
    ExpansionTooLong(usize),

    #[error("user command recursion deeper than {0}")]
    RecursionLimit(usize),

    #[error("{0}")]
    Prefs(#[from] crate::prefs::PrefsError),

    #[error("{0}")]
    Dcc(#[from] DccError),

    #[error("{0}")]
    Usage(&'static str),
}
