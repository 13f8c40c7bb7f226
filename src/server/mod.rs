//! Server connections.
//!
//! A [`Server`] holds everything known about one network connection: link
//! state, the tables learned from 005, its sessions, and the outbound send
//! queue. The socket itself lives in a connection task (see
//! [`connection`]); the server only keeps a handle to it.

pub mod connection;
mod inbound;
mod login;
mod queue;
mod session;

pub use connection::{ConnCommand, ConnEvent, ConnHandle, ConnMsg, ConnectParams, IrcStream};
pub use queue::{SendQueue, priority};
pub use session::{AlertFlags, Session, SessionKind, TriState, User};

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use slirc_proto::{
    Casemapping, ChanModes, DccRequest, Encoding, PrefixSpec, SaslMechanism,
    isupport::DEFAULT_CHANTYPES,
};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::events::TextEvent;
use crate::notify::PresenceUpdate;
use crate::prefs::{NetworkConfig, Prefs};
use crate::ui::Target;

/// Identifies a server for the lifetime of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Last connect attempt or TLS handshake failed.
    Failed,
    Connecting,
    /// Socket up, registration in progress.
    Connected,
    /// 001 received.
    Registered,
}

/// What [`Server::cleanup`] found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupState {
    NotConnected,
    StillConnecting,
    Connected,
    ReconnectPending,
}

/// Features learned from CAP and 005.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub supports_watch: bool,
    pub supports_monitor: bool,
    pub monitor_limit: Option<usize>,
    pub have_except: bool,
    pub have_invite: bool,
    pub have_whox: bool,
    pub have_namesx: bool,
    pub have_uhnames: bool,
    /// Mechanism chosen for this connection, if any.
    pub sasl_mechanism: Option<SaslMechanism>,
    /// Capabilities acknowledged by the server.
    pub enabled: Vec<String>,
    /// `MODES=`: parameterised mode changes per line.
    pub modes_per_line: usize,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            supports_watch: false,
            supports_monitor: false,
            monitor_limit: None,
            have_except: false,
            have_invite: false,
            have_whox: false,
            have_namesx: false,
            have_uhnames: false,
            sasl_mechanism: None,
            enabled: Vec::new(),
            modes_per_line: 3,
        }
    }
}

impl Capabilities {
    pub fn has(&self, cap: &str) -> bool {
        self.enabled.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }
}

/// Side effects of an inbound message that reach beyond the server.
#[derive(Debug)]
pub enum Output {
    Print(Target, TextEvent),
    /// A DCC CTCP for the DCC engine.
    Dcc {
        nick: String,
        userhost: Option<String>,
        request: DccRequest,
    },
    Presence(PresenceUpdate),
    /// End of MOTD: autojoin, notify setup, connect commands.
    LoggedIn,
    /// Our address as seen by the server (302 reply).
    DccIp(IpAddr),
    /// Someone else changed nick; DCC entries follow.
    NickChange { old: String, new: String },
}

pub struct Server {
    pub id: ServerId,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub network: Option<NetworkConfig>,
    /// `NETWORK=` from 005.
    pub network_name: Option<String>,
    pub nick: String,
    pub no_login: bool,
    pub encoding: &'static Encoding,
    /// The network config named an encoding; 005 `CHARSET` is ignored.
    pub encoding_pinned: bool,
    pub caps: Capabilities,
    pub chanmodes: ChanModes,
    pub prefix: PrefixSpec,
    pub chantypes: String,
    pub casemap: Casemapping,
    pub queue: SendQueue,
    pub link: LinkState,
    pub end_of_motd: bool,
    pub sessions: Vec<Session>,
    /// Channels (and keys) to join again after a reconnect.
    pub rejoin: Vec<(String, Option<String>)>,
    /// Bumped on every connect and cleanup.
    pub r#gen: u64,
    pub conn: Option<ConnHandle>,
    pub reconnect: Option<AbortHandle>,
    pub lag_sent: Option<Instant>,
    pub lag: Option<Duration>,
    pub lag_verbose: bool,
    pub last_recv: Instant,
    pub local_addr: Option<SocketAddr>,
    pub dcc_ip: Option<IpAddr>,
    nick_attempt: u8,
    cap_ls: Vec<(String, Option<String>)>,
    sasl_pending: bool,
}

impl Server {
    pub fn new(
        id: ServerId,
        host: &str,
        port: u16,
        tls: bool,
        network: Option<NetworkConfig>,
        prefs: &Prefs,
    ) -> Self {
        let nick = network
            .as_ref()
            .and_then(|n| n.nick.clone())
            .unwrap_or_else(|| prefs.get_str("irc_nick1").to_owned());
        let pinned = network
            .as_ref()
            .and_then(|n| n.encoding.as_deref())
            .and_then(slirc_proto::encoding_for_label);
        let no_login = network.as_ref().is_some_and(|n| n.no_login);
        let casemap = Casemapping::default();
        let prefix = PrefixSpec::default();
        let server_tab = Session::new(host, SessionKind::Server, casemap, prefix.clone());
        Server {
            id,
            host: host.to_owned(),
            port,
            tls,
            network,
            network_name: None,
            nick,
            no_login,
            encoding: pinned.unwrap_or(slirc_proto::UTF_8),
            encoding_pinned: pinned.is_some(),
            caps: Capabilities::default(),
            chanmodes: ChanModes::default(),
            prefix,
            chantypes: DEFAULT_CHANTYPES.to_owned(),
            casemap,
            queue: SendQueue::new(prefs.get_bool("net_throttle")),
            link: LinkState::Disconnected,
            end_of_motd: false,
            sessions: vec![server_tab],
            rejoin: Vec::new(),
            r#gen: 0,
            conn: None,
            reconnect: None,
            lag_sent: None,
            lag: None,
            lag_verbose: false,
            last_recv: Instant::now(),
            local_addr: None,
            dcc_ip: None,
            nick_attempt: 0,
            cap_ls: Vec::new(),
            sasl_pending: false,
        }
    }

    /// Network name for display and notify restrictions.
    pub fn network_label(&self) -> &str {
        self.network_name
            .as_deref()
            .or(self.network.as_ref().map(|n| n.name.as_str()))
            .unwrap_or(&self.host)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, LinkState::Connected | LinkState::Registered)
    }

    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }

    pub fn is_me(&self, nick: &str) -> bool {
        self.casemap.equals(nick, &self.nick)
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.kind != SessionKind::Server && self.casemap.equals(&s.name, name))
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        let casemap = self.casemap;
        self.sessions
            .iter_mut()
            .find(|s| s.kind != SessionKind::Server && casemap.equals(&s.name, name))
    }

    /// Find or open a session.
    pub fn session_or_create(&mut self, name: &str, kind: SessionKind) -> &mut Session {
        let casemap = self.casemap;
        let idx = match self
            .sessions
            .iter()
            .position(|s| s.kind != SessionKind::Server && casemap.equals(&s.name, name))
        {
            Some(idx) => idx,
            None => {
                self.sessions
                    .push(Session::new(name, kind, casemap, self.prefix.clone()));
                self.sessions.len() - 1
            }
        };
        &mut self.sessions[idx]
    }

    pub fn close_session(&mut self, name: &str) -> bool {
        let casemap = self.casemap;
        let before = self.sessions.len();
        self.sessions
            .retain(|s| s.kind == SessionKind::Server || !casemap.equals(&s.name, name));
        self.sessions.len() != before
    }

    /// Print target for a session name, falling back to the server tab.
    pub fn target_for(&self, name: &str) -> Target {
        match self.session(name) {
            Some(s) => Target::Session(self.id, s.name.clone()),
            None => Target::Server(self.id),
        }
    }

    /// Queue a line for sending.
    pub fn send(&mut self, line: impl Into<String>) {
        self.queue.push(line.into());
    }

    /// Write out what the throttle allows at `now` (wall clock seconds).
    pub fn flush(&mut self, now: i64) -> usize {
        let Some(conn) = &self.conn else {
            return 0;
        };
        if !self.is_connected() {
            return 0;
        }
        let lines = self.queue.poll(now);
        for line in &lines {
            debug!(server = %self.host, line = %line, "send");
            conn.send(line.clone());
        }
        lines.len()
    }

    /// Remember joined channels so they can be rejoined.
    pub fn remember_channels(&mut self) {
        let joined: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| s.is_channel() && s.joined)
            .map(|s| (s.name.clone(), s.key.clone()))
            .collect();
        if !joined.is_empty() {
            self.rejoin = joined;
        }
    }

    /// Cancel the connection task and the reconnect timer, optionally
    /// sending QUIT first. Safe to call repeatedly.
    pub fn cleanup(&mut self, quit: Option<&str>) -> CleanupState {
        let reconnect_pending = match self.reconnect.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        };

        let state = match self.link {
            LinkState::Disconnected | LinkState::Failed if reconnect_pending => {
                CleanupState::ReconnectPending
            }
            LinkState::Disconnected | LinkState::Failed => CleanupState::NotConnected,
            LinkState::Connecting => CleanupState::StillConnecting,
            LinkState::Connected | LinkState::Registered => CleanupState::Connected,
        };

        if let Some(conn) = self.conn.take() {
            match quit {
                // The task exits on its own once the peer closes or the
                // grace period ends.
                Some(reason) if state == CleanupState::Connected => {
                    conn.quit(format!("QUIT :{}", reason));
                }
                _ => conn.abort(),
            }
        }

        if state == CleanupState::Connected {
            self.remember_channels();
        }
        self.r#gen += 1;
        self.queue.clear();
        self.link = LinkState::Disconnected;
        self.end_of_motd = false;
        self.lag_sent = None;
        self.cap_ls.clear();
        self.sasl_pending = false;
        for session in &mut self.sessions {
            session.disconnect();
        }
        state
    }

    /// Reset per-connection state for a new attempt and return its
    /// generation.
    pub fn begin_connect(&mut self, prefs: &Prefs) -> u64 {
        self.r#gen += 1;
        self.link = LinkState::Connecting;
        self.end_of_motd = false;
        self.nick_attempt = 0;
        self.caps = Capabilities::default();
        self.chanmodes = ChanModes::default();
        self.prefix = PrefixSpec::default();
        self.chantypes = DEFAULT_CHANTYPES.to_owned();
        self.casemap = Casemapping::default();
        self.network_name = None;
        self.queue.set_throttle(prefs.get_bool("net_throttle"));
        self.queue.clear();
        for session in &mut self.sessions {
            session.set_tables(self.casemap, self.prefix.clone());
        }
        self.r#gen
    }

    /// The address the server sees us as, for DCC offers.
    pub fn announce_ip(&self, prefs: &Prefs) -> Option<IpAddr> {
        let configured = prefs.get_str("dcc_ip");
        if let Ok(ip) = configured.parse() {
            return Some(ip);
        }
        if prefs.get_bool("dcc_ip_from_server") {
            if let Some(ip) = self.dcc_ip {
                return Some(ip);
            }
        }
        self.local_addr.map(|a| a.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_states() {
        let prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "irc.example.net", 6667, false, None, &prefs);
        assert_eq!(server.cleanup(None), CleanupState::NotConnected);

        server.begin_connect(&prefs);
        assert_eq!(server.cleanup(None), CleanupState::StillConnecting);
        assert_eq!(server.cleanup(None), CleanupState::NotConnected);

        server.link = LinkState::Registered;
        let chan = server.session_or_create("#rust", SessionKind::Channel);
        chan.joined = true;
        chan.key = Some("k".into());
        assert_eq!(server.cleanup(Some("bye")), CleanupState::Connected);
        assert_eq!(server.rejoin, vec![("#rust".to_owned(), Some("k".to_owned()))]);
        assert!(!server.session("#RUST").unwrap().joined);

        server.link = LinkState::Failed;
        assert_eq!(server.cleanup(None), CleanupState::NotConnected);
        assert_eq!(server.link, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_cleanup_reports_pending_reconnect() {
        let prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "irc.example.net", 6667, false, None, &prefs);
        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        server.reconnect = Some(timer.abort_handle());
        assert_eq!(server.cleanup(None), CleanupState::ReconnectPending);
        assert!(server.reconnect.is_none());
    }

    #[test]
    fn test_generation_bumps() {
        let prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "h", 6667, false, None, &prefs);
        let g1 = server.begin_connect(&prefs);
        server.cleanup(None);
        let g2 = server.begin_connect(&prefs);
        assert!(g2 > g1 + 1);
    }

    #[test]
    fn test_announce_ip_preference() {
        let mut prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "h", 6667, false, None, &prefs);
        server.local_addr = Some("192.0.2.10:50000".parse().unwrap());
        server.dcc_ip = Some("198.51.100.1".parse().unwrap());
        assert_eq!(server.announce_ip(&prefs), Some("192.0.2.10".parse().unwrap()));
        prefs.set_bool("dcc_ip_from_server", true).unwrap();
        assert_eq!(server.announce_ip(&prefs), Some("198.51.100.1".parse().unwrap()));
        prefs.set("dcc_ip", "203.0.113.5").unwrap();
        assert_eq!(server.announce_ip(&prefs), Some("203.0.113.5".parse().unwrap()));
    }
}
