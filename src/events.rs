//! Human-readable notifications.
//!
//! Everything the engine wants a person to see goes through [`TextEvent`];
//! its `Display` impl is the printed text. Diagnostics go to `tracing`.

use std::fmt;

use crate::dcc::DccType;
use crate::mode::ModeEvent;

/// Format a byte count the way transfer lists show it.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[derive(Clone, Debug, PartialEq)]
pub enum TextEvent {
    // connection
    Connecting { host: String, port: u16 },
    Connected { host: String },
    ConnectFailed { host: String, reason: String },
    Disconnected { reason: String },
    Reconnecting { seconds: f64 },
    StillConnecting,
    NotConnected,
    ServerError(String),
    ServerText(String),
    Motd(String),
    Lag { millis: u64 },
    NickInUse { nick: String, retry: String },
    Capabilities(String),
    SaslAuthenticating(String),
    SaslResult(String),
    TruncatedLine,

    // channels and users
    Join { nick: String, channel: String, host: String },
    YouJoin { channel: String },
    Part { nick: String, channel: String, reason: String },
    Kick { kicker: String, nick: String, channel: String, reason: String },
    Quit { nick: String, reason: String },
    NickChange { old: String, new: String },
    Topic { channel: String, topic: String },
    TopicChange { nick: String, channel: String, topic: String },
    Names { channel: String, names: String },
    Away { nick: String, message: String },
    Back { nick: String },
    Account { nick: String, account: Option<String> },
    HostChange { nick: String, user: String, host: String },
    Mode(ModeEvent),
    ChannelModes { channel: String, modes: String },

    // messages
    Message { nick: String, text: String },
    Notice { nick: String, text: String },
    Action { nick: String, text: String },
    SelfMessage { nick: String, text: String },
    CtcpRequest { nick: String, what: String },
    CtcpReply { nick: String, what: String, text: String },

    // notify
    NotifyOnline { nick: String, network: String },
    NotifyOffline { nick: String, network: String },
    NotifyAdded { nick: String },
    NotifyRemoved { nick: String },

    // dcc
    DccOffer { nick: String, file: String, size: u64 },
    DccChatOffer { nick: String },
    DccOffered { nick: String, file: String },
    DccChatOffered { nick: String },
    DccConnecting { kind: DccType, nick: String, file: String },
    DccConnected { kind: DccType, nick: String, file: String, peer: String },
    DccComplete { kind: DccType, nick: String, file: String, cps: u64 },
    DccFailed { kind: DccType, nick: String, file: String, error: String },
    DccAborted { kind: DccType, nick: String, file: String },
    DccStall { kind: DccType, nick: String, file: String },
    DccTimeout { nick: String, file: String },
    DccResumeRequest { nick: String, file: String, pos: u64 },
    DccResumeInProgress { file: String },
    DccRenamed { old: String, new: String },
    DccMalformed { nick: String, reason: String },
    DccMoveFailed { file: String, error: String },
    DccChatText { nick: String, text: String },
    DccList(String),

    // generic
    Info(String),
    Error(String),
}

impl fmt::Display for TextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TextEvent::*;
        match self {
            Connecting { host, port } => write!(f, "* Connecting to {} ({})", host, port),
            Connected { host } => write!(f, "* Connected to {}. Logging in...", host),
            ConnectFailed { host, reason } => write!(f, "* Connection to {} failed: {}", host, reason),
            Disconnected { reason } => write!(f, "* Disconnected ({})", reason),
            Reconnecting { seconds } => write!(f, "* Reconnecting in {} seconds...", seconds),
            StillConnecting => f.write_str("* Already connecting"),
            NotConnected => f.write_str("* Not connected"),
            ServerError(text) => write!(f, "* Server error: {}", text),
            ServerText(text) => f.write_str(text),
            Motd(text) => f.write_str(text),
            Lag { millis } => write!(f, "* Lag: {}.{:03}s", millis / 1000, millis % 1000),
            NickInUse { nick, retry } => write!(f, "* {} is already in use. Retrying with {}...", nick, retry),
            Capabilities(caps) => write!(f, "* Capabilities acknowledged: {}", caps),
            SaslAuthenticating(mech) => write!(f, "* Authenticating via SASL as {}", mech),
            SaslResult(text) => write!(f, "* {}", text),
            TruncatedLine => f.write_str("* Warning: over-long line from server was truncated"),

            Join { nick, channel, host } => write!(f, "* {} ({}) has joined {}", nick, host, channel),
            YouJoin { channel } => write!(f, "* Now talking on {}", channel),
            Part { nick, channel, reason } if reason.is_empty() => write!(f, "* {} has left {}", nick, channel),
            Part { nick, channel, reason } => write!(f, "* {} has left {} ({})", nick, channel, reason),
            Kick { kicker, nick, channel, reason } => {
                write!(f, "* {} has kicked {} from {} ({})", kicker, nick, channel, reason)
            }
            Quit { nick, reason } => write!(f, "* {} has quit ({})", nick, reason),
            NickChange { old, new } => write!(f, "* {} is now known as {}", old, new),
            Topic { channel, topic } => write!(f, "* Topic for {} is: {}", channel, topic),
            TopicChange { nick, channel, topic } => {
                write!(f, "* {} has changed the topic of {} to: {}", nick, channel, topic)
            }
            Names { channel, names } => write!(f, "* Users on {}: {}", channel, names),
            Away { nick, message } => write!(f, "* {} is away ({})", nick, message),
            Back { nick } => write!(f, "* {} is back", nick),
            Account { nick, account: Some(account) } => write!(f, "* {} is now logged in as {}", nick, account),
            Account { nick, account: None } => write!(f, "* {} has logged out", nick),
            HostChange { nick, user, host } => write!(f, "* {} has changed host to {}@{}", nick, user, host),
            Mode(event) => write!(f, "{}", event),
            ChannelModes { channel, modes } => write!(f, "* Channel {} modes: {}", channel, modes),

            Message { nick, text } | SelfMessage { nick, text } => write!(f, "<{}> {}", nick, text),
            Notice { nick, text } => write!(f, "-{}- {}", nick, text),
            Action { nick, text } => write!(f, "* {} {}", nick, text),
            CtcpRequest { nick, what } => write!(f, "* Received a CTCP {} from {}", what, nick),
            CtcpReply { nick, what, text } => write!(f, "* CTCP {} reply from {}: {}", what, nick, text),

            NotifyOnline { nick, network } => write!(f, "* Notify: {} is online ({})", nick, network),
            NotifyOffline { nick, network } => write!(f, "* Notify: {} is offline ({})", nick, network),
            NotifyAdded { nick } => write!(f, "* {} added to notify list", nick),
            NotifyRemoved { nick } => write!(f, "* {} deleted from notify list", nick),

            DccOffer { nick, file, size } => {
                write!(f, "* {} has offered {} ({})", nick, file, human_size(*size))
            }
            DccChatOffer { nick } => write!(f, "* Received a DCC CHAT offer from {}", nick),
            DccOffered { nick, file } => write!(f, "* Offering {} to {}", file, nick),
            DccChatOffered { nick } => write!(f, "* Offering DCC CHAT to {}", nick),
            DccConnecting { kind, nick, file } => write!(f, "* DCC {} connecting to {} ({})", kind, nick, file),
            DccConnected { kind, nick, file, peer } => {
                write!(f, "* DCC {} connection established to {} [{}] ({})", kind, nick, peer, file)
            }
            DccComplete { kind, nick, file, cps } => write!(
                f,
                "* DCC {} of {} {} {} complete, {}/s",
                kind,
                file,
                if *kind == DccType::Send { "to" } else { "from" },
                nick,
                human_size(*cps)
            ),
            DccFailed { kind, nick, file, error } => {
                write!(f, "* DCC {} of {} ({}) failed: {}", kind, file, nick, error)
            }
            DccAborted { kind, nick, file } => write!(f, "* DCC {} {} to {} aborted", kind, file, nick),
            DccStall { kind, nick, file } => write!(f, "* DCC {} {} to {} stalled - aborting", kind, file, nick),
            DccTimeout { nick, file } => write!(f, "* DCC SEND {} to {} timed out - aborting", file, nick),
            DccResumeRequest { nick, file, pos } => {
                write!(f, "* {} has requested to resume {} from {}", nick, file, pos)
            }
            DccResumeInProgress { file } => {
                write!(f, "* Cannot resume {}: another transfer is writing to it", file)
            }
            DccRenamed { old, new } => write!(f, "* The file {} already exists, saving it as {} instead", old, new),
            DccMalformed { nick, reason } => write!(f, "* Received a malformed DCC request from {}: {}", nick, reason),
            DccMoveFailed { file, error } => write!(f, "* Could not move {} to the completed directory: {}", file, error),
            DccChatText { nick, text } => write!(f, "<{}> {}", nick, text),
            DccList(text) => f.write_str(text),

            Info(text) => write!(f, "* {}", text),
            Error(text) => write!(f, "* Error: {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(10), "10 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn test_failed_carries_reason() {
        let text = TextEvent::DccFailed {
            kind: DccType::Recv,
            nick: "bob".into(),
            file: "a.txt".into(),
            error: "connection closed".into(),
        }
        .to_string();
        assert!(text.ends_with("failed: connection closed"));
    }

    #[test]
    fn test_tls_timeout_wording() {
        let text = TextEvent::ConnectFailed {
            host: "irc.example.net".into(),
            reason: crate::error::ConnectError::TlsTimeout.to_string(),
        }
        .to_string();
        assert!(text.contains("handshake timed out"));
    }
}
