//! DCC file transfers and chats.
//!
//! [`DccEngine`] owns every transfer. Socket work happens in spawned tasks
//! (one per transfer at a time) that report back through [`DccEvent`]s
//! tagged with the transfer id and a generation; the engine bumps the
//! generation on close, so anything a dead task sent afterwards is ignored.
//!
//! Operations never touch the frontend or a server directly. They queue
//! [`DccAction`]s (CTCPs to send, text to print, display updates) that the
//! client drains with [`DccEngine::take_actions`].
//!
//! State machine:
//!
//! ```text
//! Queued -> Connecting -> Active -> Done | Failed | Aborted
//!    \______________________________/^
//! ```
//!
//! `/dcc get` on a terminal RECV puts it back to `Queued`.

mod close;
mod cps;
mod offer;
mod receive;
mod worker;

use std::fmt;
use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::DccError;
use crate::events::TextEvent;
use crate::net::{DnsCache, Resolver};
use crate::prefs::Prefs;
use crate::server::ServerId;
use crate::ui::Target;

pub use cps::CPS_AVG_WINDOW;

pub type DccId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DccType {
    Send,
    Recv,
    ChatSend,
    ChatRecv,
}

impl DccType {
    pub fn is_chat(self) -> bool {
        matches!(self, DccType::ChatSend | DccType::ChatRecv)
    }

    /// The side that offered: we for `Send`/`ChatSend`.
    pub fn is_outgoing(self) -> bool {
        matches!(self, DccType::Send | DccType::ChatSend)
    }
}

impl fmt::Display for DccType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DccType::Send => "SEND",
            DccType::Recv => "RECV",
            DccType::ChatSend | DccType::ChatRecv => "CHAT",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DccState {
    Queued,
    Connecting,
    Active,
    Failed,
    Done,
    Aborted,
}

impl DccState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DccState::Failed | DccState::Done | DccState::Aborted)
    }
}

impl fmt::Display for DccState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DccState::Queued => "Waiting",
            DccState::Connecting => "Connecting",
            DccState::Active => "Active",
            DccState::Failed => "Failed",
            DccState::Done => "Done",
            DccState::Aborted => "Aborted",
        })
    }
}

/// Why an incoming file cannot be resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeError {
    /// The local file is already at least as large as the offer.
    AlreadyComplete,
    /// Another live RECV writes to the same file.
    InProgressElsewhere,
}

/// One transfer or chat.
#[derive(Debug)]
pub struct Transfer {
    pub id: DccId,
    pub kind: DccType,
    pub state: DccState,
    pub server: ServerId,
    pub nick: String,

    /// Name as it travels on the wire.
    pub file: String,
    /// Local source (SEND) or destination (RECV).
    pub path: PathBuf,
    pub size: u64,
    pub pos: u64,
    pub ack: u64,
    pub resumable: u64,
    pub resume_error: Option<ResumeError>,
    /// Set once a RESUME was sent or granted.
    pub resumed: bool,

    pub addr: Option<IpAddr>,
    pub port: u16,
    pub pasvid: Option<u32>,
    /// No listener on the offering side; the accepting side listens.
    pub passive: bool,

    pub cps: i64,
    pub maxcps: i64,
    pub throttled: u8,
    pub error: Option<String>,

    pub offer_time: Instant,
    pub last_activity: Instant,
    firstcpstime: Option<Instant>,
    lastcpstime: Instant,
    lastcpspos: u64,

    r#gen: u64,
    task: Option<AbortHandle>,
    source: Option<File>,
    throttle_tx: Option<watch::Sender<u8>>,
    chat_tx: Option<mpsc::UnboundedSender<String>>,
}

impl Transfer {
    fn new(id: DccId, kind: DccType, server: ServerId, nick: &str, now: Instant) -> Self {
        Self {
            id,
            kind,
            state: DccState::Queued,
            server,
            nick: nick.to_owned(),
            file: String::new(),
            path: PathBuf::new(),
            size: 0,
            pos: 0,
            ack: 0,
            resumable: 0,
            resume_error: None,
            resumed: false,
            addr: None,
            port: 0,
            pasvid: None,
            passive: false,
            cps: 0,
            maxcps: 0,
            throttled: 0,
            error: None,
            offer_time: now,
            last_activity: now,
            firstcpstime: None,
            lastcpstime: now,
            lastcpspos: 0,
            r#gen: 0,
            task: None,
            source: None,
            throttle_tx: None,
            chat_tx: None,
        }
    }

    /// Display name: the file for transfers, the nick for chats.
    pub fn label(&self) -> &str {
        if self.kind.is_chat() { &self.nick } else { &self.file }
    }

    pub fn view(&self) -> DccView {
        DccView {
            id: self.id,
            kind: self.kind,
            state: self.state,
            nick: self.nick.clone(),
            file: self.file.clone(),
            size: self.size,
            pos: self.pos,
            ack: self.ack,
            cps: self.cps.max(0) as u64,
            resumable: self.resumable,
            throttled: self.throttled,
        }
    }

    /// Stop whatever task is running and forget its channels.
    fn stop_io(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.throttle_tx = None;
        self.chat_tx = None;
        self.source = None;
        self.r#gen += 1;
    }
}

/// Snapshot handed to the frontend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DccView {
    pub id: DccId,
    pub kind: DccType,
    pub state: DccState,
    pub nick: String,
    pub file: String,
    pub size: u64,
    pub pos: u64,
    pub ack: u64,
    pub cps: u64,
    pub resumable: u64,
    pub throttled: u8,
}

/// Report from a transfer task.
#[derive(Debug)]
pub struct DccEvent {
    pub id: DccId,
    pub r#gen: u64,
    pub kind: DccEventKind,
}

#[derive(Debug)]
pub enum DccEventKind {
    /// The socket is up (accepted or connected).
    Connected(TcpStream, SocketAddr),
    Progress { pos: u64, ack: u64 },
    Done { pos: u64, ack: u64 },
    Failed(String),
    ChatLine(String),
}

/// Side effect for the client to carry out.
#[derive(Clone, Debug, PartialEq)]
pub enum DccAction {
    /// Send `\x01body\x01` as a PRIVMSG to `nick` on `server`.
    Ctcp { server: ServerId, nick: String, body: String },
    Print { target: Target, event: TextEvent },
    Update(DccId),
    Removed(DccId),
    /// Ask the user; answer with [`DccEngine::accept`].
    AskAccept { id: DccId, prompt: String },
}

/// All DCC state of one client.
pub struct DccEngine {
    /// Newest first.
    transfers: Vec<Transfer>,
    next_id: DccId,
    next_pasvid: Option<u32>,
    pub send_cps_sum: i64,
    pub get_cps_sum: i64,
    /// Bit 0x1: global send cap reached. Bit 0x2: global receive cap.
    pub global_throttle: u8,
    events_tx: mpsc::UnboundedSender<DccEvent>,
    resolver: Arc<Resolver>,
    dns_cache: Arc<DnsCache>,
    download_dir: PathBuf,
    actions: Vec<DccAction>,
}

impl DccEngine {
    pub fn new(
        resolver: Arc<Resolver>,
        dns_cache: Arc<DnsCache>,
        download_dir: PathBuf,
    ) -> (Self, mpsc::UnboundedReceiver<DccEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            transfers: Vec::new(),
            next_id: 1,
            next_pasvid: None,
            send_cps_sum: 0,
            get_cps_sum: 0,
            global_throttle: 0,
            events_tx,
            resolver,
            dns_cache,
            download_dir,
            actions: Vec::new(),
        };
        (engine, events_rx)
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn get(&self, id: DccId) -> Option<&Transfer> {
        self.transfers.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: DccId) -> Option<&mut Transfer> {
        self.transfers.iter_mut().find(|t| t.id == id)
    }

    pub fn view(&self, id: DccId) -> Option<DccView> {
        self.get(id).map(Transfer::view)
    }

    /// Drain the queued side effects.
    pub fn take_actions(&mut self) -> Vec<DccAction> {
        std::mem::take(&mut self.actions)
    }

    fn push_transfer(&mut self, mut transfer: Transfer) -> DccId {
        let id = self.next_id;
        self.next_id += 1;
        transfer.id = id;
        self.transfers.insert(0, transfer);
        self.actions.push(DccAction::Update(id));
        id
    }

    fn print(&mut self, event: TextEvent) {
        self.actions.push(DccAction::Print {
            target: Target::Front,
            event,
        });
    }

    fn ctcp(&mut self, server: ServerId, nick: &str, body: String) {
        self.actions.push(DccAction::Ctcp {
            server,
            nick: nick.to_owned(),
            body,
        });
    }

    /// Find the transfer a `/dcc` argument names: a numeric id, or a nick
    /// (optionally with a file name) matching the most recent entry.
    pub fn find(&self, kind: Option<DccType>, nick: &str, file: Option<&str>) -> Option<DccId> {
        if let Ok(id) = nick.parse::<DccId>() {
            if self.get(id).is_some() {
                return Some(id);
            }
        }
        self.transfers
            .iter()
            .find(|t| {
                kind.is_none_or(|k| t.kind == k)
                    && slirc_proto::irc_eq(&t.nick, nick)
                    && file.is_none_or(|f| t.file.eq_ignore_ascii_case(f))
            })
            .map(|t| t.id)
    }

    /// Send a line over an active chat with `nick`.
    pub fn send_chat(&mut self, nick: &str, text: &str, self_nick: &str) -> Result<(), DccError> {
        let chat = self
            .transfers
            .iter()
            .find(|t| t.kind.is_chat() && t.state == DccState::Active && slirc_proto::irc_eq(&t.nick, nick))
            .ok_or_else(|| DccError::NoSuchTransfer(format!("chat with {}", nick)))?;
        let tx = chat
            .chat_tx
            .as_ref()
            .ok_or_else(|| DccError::NoSuchTransfer(format!("chat with {}", nick)))?;
        if tx.send(text.to_owned()).is_err() {
            return Err(DccError::NoSuchTransfer(format!("chat with {}", nick)));
        }
        let target = Target::DccChat(chat.nick.clone());
        self.actions.push(DccAction::Print {
            target,
            event: TextEvent::SelfMessage {
                nick: self_nick.to_owned(),
                text: text.to_owned(),
            },
        });
        Ok(())
    }

    /// Human-readable transfer table for `/dcc list`.
    pub fn list(&self) -> Vec<String> {
        let mut lines = vec![format!(
            " {:<4} {:<5} {:<12} {:<10} {:>10} {:>10} {:>9}  {}",
            "Id", "Type", "To/From", "Status", "Size", "Pos", "CPS", "File"
        )];
        for t in &self.transfers {
            lines.push(format!(
                " {:<4} {:<5} {:<12} {:<10} {:>10} {:>10} {:>9}  {}",
                t.id,
                t.kind.to_string(),
                t.nick,
                t.state.to_string(),
                crate::events::human_size(t.size),
                crate::events::human_size(t.pos),
                crate::events::human_size(t.cps.max(0) as u64),
                t.label()
            ));
        }
        if self.transfers.is_empty() {
            lines.push(String::from(" No active DCCs"));
        }
        lines
    }

    /// Apply a report from a transfer task.
    pub fn handle_event(&mut self, prefs: &Prefs, event: DccEvent) {
        let now = Instant::now();
        let Some(t) = self.get_mut(event.id) else {
            debug!(dcc_id = event.id, "event for removed transfer");
            return;
        };
        if t.r#gen != event.r#gen {
            debug!(dcc_id = event.id, "gen" = event.r#gen, current = t.r#gen, "stale transfer event");
            return;
        }

        match event.kind {
            DccEventKind::Connected(stream, peer) => self.on_connected(prefs, event.id, stream, peer, now),
            DccEventKind::Progress { pos, ack } => {
                if t.state != DccState::Active {
                    return;
                }
                if pos > t.pos {
                    t.pos = pos;
                    t.last_activity = now;
                }
                if ack > t.ack {
                    t.ack = ack;
                    t.last_activity = now;
                }
            }
            DccEventKind::Done { pos, ack } => {
                t.pos = t.pos.max(pos);
                t.ack = t.ack.max(ack);
                if t.pos >= t.size {
                    let event = TextEvent::DccComplete {
                        kind: t.kind,
                        nick: t.nick.clone(),
                        file: t.file.clone(),
                        cps: t.cps.max(0) as u64,
                    };
                    let id = t.id;
                    self.print(event);
                    self.close(prefs, id, DccState::Done, false);
                } else {
                    let id = t.id;
                    self.fail(prefs, id, String::from("connection closed"));
                }
            }
            DccEventKind::Failed(error) => {
                let id = t.id;
                if t.kind.is_chat() {
                    let (kind, nick) = (t.kind, t.nick.clone());
                    self.actions.push(DccAction::Print {
                        target: Target::DccChat(nick.clone()),
                        event: TextEvent::DccFailed {
                            kind,
                            nick,
                            file: String::from("chat"),
                            error: error.clone(),
                        },
                    });
                    self.set_error_and_close(prefs, id, error);
                } else {
                    self.fail(prefs, id, error);
                }
            }
            DccEventKind::ChatLine(text) => {
                t.last_activity = now;
                let nick = t.nick.clone();
                self.actions.push(DccAction::Print {
                    target: Target::DccChat(nick.clone()),
                    event: TextEvent::DccChatText { nick, text },
                });
            }
        }
    }

    fn set_error_and_close(&mut self, prefs: &Prefs, id: DccId, error: String) {
        if let Some(t) = self.get_mut(id) {
            t.error = Some(error);
        }
        self.close(prefs, id, DccState::Failed, false);
    }

    /// Mark a transfer failed, telling the user why.
    fn fail(&mut self, prefs: &Prefs, id: DccId, error: String) {
        let Some(t) = self.get(id) else { return };
        if t.state.is_terminal() {
            return;
        }
        warn!(dcc_id = id, nick = %t.nick, file = %t.file, error = %error, "transfer failed");
        let event = TextEvent::DccFailed {
            kind: t.kind,
            nick: t.nick.clone(),
            file: t.label().to_owned(),
            error: error.clone(),
        };
        self.print(event);
        self.set_error_and_close(prefs, id, error);
    }

    /// User-requested abort (`/dcc close`).
    pub fn abort(&mut self, prefs: &Prefs, id: DccId) -> Result<(), DccError> {
        let t = self
            .get(id)
            .ok_or_else(|| DccError::NoSuchTransfer(id.to_string()))?;
        if !t.state.is_terminal() {
            let event = TextEvent::DccAborted {
                kind: t.kind,
                nick: t.nick.clone(),
                file: t.label().to_owned(),
            };
            self.print(event);
            self.close(prefs, id, DccState::Aborted, false);
        } else {
            let state = t.state;
            self.close(prefs, id, state, true);
        }
        Ok(())
    }

    /// The peer's nick changed.
    pub fn rename_nick(&mut self, server: ServerId, old: &str, new: &str) {
        for t in &mut self.transfers {
            if t.server == server && slirc_proto::irc_eq(&t.nick, old) {
                t.nick = new.to_owned();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn engine(dir: &std::path::Path) -> (DccEngine, mpsc::UnboundedReceiver<DccEvent>) {
        DccEngine::new(
            Arc::new(Resolver::new()),
            Arc::new(DnsCache::default()),
            dir.to_path_buf(),
        )
    }

    #[test]
    fn test_type_and_state_text() {
        assert_eq!(DccType::ChatRecv.to_string(), "CHAT");
        assert_eq!(DccType::Recv.to_string(), "RECV");
        assert_eq!(DccState::Queued.to_string(), "Waiting");
        assert!(DccState::Aborted.is_terminal());
        assert!(!DccState::Active.is_terminal());
    }

    #[tokio::test]
    async fn test_stale_event_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let id = engine.push_transfer(Transfer::new(0, DccType::Recv, ServerId(1), "bob", Instant::now()));
        engine.get_mut(id).unwrap().state = DccState::Active;
        engine.get_mut(id).unwrap().size = 100;

        engine.handle_event(
            &prefs,
            DccEvent {
                id,
                r#gen: 7,
                kind: DccEventKind::Progress { pos: 50, ack: 50 },
            },
        );
        assert_eq!(engine.get(id).unwrap().pos, 0);

        engine.handle_event(
            &prefs,
            DccEvent {
                id,
                r#gen: 0,
                kind: DccEventKind::Progress { pos: 50, ack: 50 },
            },
        );
        assert_eq!(engine.get(id).unwrap().pos, 50);
    }

    #[tokio::test]
    async fn test_early_done_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let id = engine.push_transfer(Transfer::new(0, DccType::Recv, ServerId(1), "bob", Instant::now()));
        {
            let t = engine.get_mut(id).unwrap();
            t.state = DccState::Active;
            t.size = 100;
        }
        engine.handle_event(
            &prefs,
            DccEvent {
                id,
                r#gen: 0,
                kind: DccEventKind::Done { pos: 60, ack: 60 },
            },
        );
        let t = engine.get(id).unwrap();
        assert_eq!(t.state, DccState::Failed);
        assert_eq!(t.error.as_deref(), Some("connection closed"));
    }

    #[tokio::test]
    async fn test_chat_echo_uses_our_nick() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let (tx, mut chat_rx) = mpsc::unbounded_channel();
        let mut chat = Transfer::new(0, DccType::ChatSend, ServerId(1), "bob", Instant::now());
        chat.state = DccState::Active;
        chat.chat_tx = Some(tx);
        engine.push_transfer(chat);

        engine.send_chat("BOB", "hi there", "alice").unwrap();
        assert_eq!(chat_rx.try_recv().unwrap(), "hi there");
        assert_eq!(
            engine.take_actions(),
            vec![DccAction::Print {
                target: Target::DccChat("bob".into()),
                event: TextEvent::SelfMessage {
                    nick: "alice".into(),
                    text: "hi there".into(),
                },
            }]
        );
        assert!(engine.send_chat("carol", "hi", "alice").is_err());
    }

    #[tokio::test]
    async fn test_find_by_nick_prefers_newest() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let now = Instant::now();
        let mut older = Transfer::new(0, DccType::Recv, ServerId(1), "bob", now);
        older.file = "a.txt".into();
        let first = engine.push_transfer(older);
        let mut newer = Transfer::new(0, DccType::Recv, ServerId(1), "bob", now);
        newer.file = "b.txt".into();
        let second = engine.push_transfer(newer);

        assert_eq!(engine.find(Some(DccType::Recv), "BOB", None), Some(second));
        assert_eq!(engine.find(None, "bob", Some("a.txt")), Some(first));
        assert_eq!(engine.find(None, &first.to_string(), None), Some(first));
        assert_eq!(engine.find(Some(DccType::Send), "bob", None), None);
    }
}
