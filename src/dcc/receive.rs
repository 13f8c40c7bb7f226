//! Incoming DCC CTCPs and everything a receiver decides: where the file
//! goes, whether it can be resumed, and when to connect or listen.

use std::fs;
use std::io::{Seek, SeekFrom};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use slirc_proto::{DccAddr, DccRequest};
use tracing::{debug, info, warn};

use super::offer::bind_listener;
use super::{DccAction, DccEngine, DccId, DccState, DccType, ResumeError, Transfer};
use crate::error::DccError;
use crate::events::TextEvent;
use crate::net::ProxyConfig;
use crate::prefs::Prefs;
use crate::server::ServerId;

/// First `path.N` that does not exist.
pub(crate) fn unique_path(path: &Path) -> PathBuf {
    let mut n = 1u32;
    loop {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Reduce an offered name to a plain file name.
pub(crate) fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => String::from("file"),
        _ => base.to_owned(),
    }
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_a: &Path, _b: &Path) -> bool {
    false
}

/// Port/address plausibility of an offer.
fn check_endpoint(addr: DccAddr, port: u16, pasvid: Option<u32>) -> Result<(), &'static str> {
    match port {
        0 if pasvid.is_none() => Err("port 0 without a passive id"),
        0 => Ok(()),
        1..=1023 => Err("refusing a privileged port"),
        _ if addr.is_unspecified() => Err("address 0 with a real port"),
        _ => Ok(()),
    }
}

impl DccEngine {
    /// Where an offered file would be written, its resume offset, and why
    /// it cannot be resumed.
    pub fn destination(
        &self,
        prefs: &Prefs,
        nick: &str,
        file: &str,
        size: u64,
    ) -> (PathBuf, u64, Option<ResumeError>) {
        let mut dir = prefs
            .get_path("dcc_dir")
            .unwrap_or_else(|| self.download_dir.clone());
        if prefs.get_bool("dcc_save_nick") {
            dir.push(sanitize_name(nick));
        }
        let name = sanitize_name(file);
        let path = dir.join(&name);

        let done_elsewhere = prefs
            .get_path("dcc_completed_dir")
            .filter(|completed| completed != &dir)
            .is_some_and(|completed| completed.join(&name).exists());
        let existing = fs::metadata(&path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len());

        let (path, resumable, error) = match existing {
            _ if done_elsewhere => (unique_path(&path), 0, Some(ResumeError::AlreadyComplete)),
            Some(len) if len >= size => (unique_path(&path), 0, Some(ResumeError::AlreadyComplete)),
            Some(len) => (path, len, None),
            None => (path, 0, None),
        };

        if self.in_progress_elsewhere(&path) {
            return (path, 0, Some(ResumeError::InProgressElsewhere));
        }
        (path, resumable, error)
    }

    /// Another live RECV writes to `path`.
    fn in_progress_elsewhere(&self, path: &Path) -> bool {
        self.transfers
            .iter()
            .filter(|t| t.kind == DccType::Recv && !t.state.is_terminal())
            .any(|t| t.path == path || same_file(&t.path, path))
    }

    /// A `DCC` CTCP from `nick`.
    pub fn handle_ctcp(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        request: DccRequest,
        our_ip: Option<IpAddr>,
    ) {
        match request {
            DccRequest::Send {
                file,
                addr,
                port,
                size,
                pasvid,
            } => {
                if let Err(reason) = check_endpoint(addr, port, pasvid) {
                    return self.malformed(nick, reason);
                }
                if let Some(id) = self.passive_reply(server, nick, DccType::Send, port, pasvid) {
                    return self.connect_to(prefs, id, addr.0, port);
                }
                self.incoming_send(prefs, server, nick, &file, addr, port, size, pasvid, our_ip);
            }
            DccRequest::Chat { addr, port, pasvid } => {
                if let Err(reason) = check_endpoint(addr, port, pasvid) {
                    return self.malformed(nick, reason);
                }
                if let Some(id) = self.passive_reply(server, nick, DccType::ChatSend, port, pasvid) {
                    return self.connect_to(prefs, id, addr.0, port);
                }
                self.incoming_chat(prefs, server, nick, addr, port, pasvid, our_ip);
            }
            DccRequest::Resume {
                file,
                port,
                pos,
                pasvid,
            } => self.resume_requested(server, nick, &file, port, pos, pasvid),
            DccRequest::Accept { port, pasvid, .. } => {
                let found = self.transfers.iter().find(|t| {
                    t.kind == DccType::Recv
                        && t.server == server
                        && t.state == DccState::Queued
                        && t.resumed
                        && slirc_proto::irc_eq(&t.nick, nick)
                        && matches_port(t, port, pasvid)
                });
                let Some(id) = found.map(|t| t.id) else {
                    return self.malformed(nick, "ACCEPT for an unknown transfer");
                };
                if let Some(t) = self.get_mut(id) {
                    t.pos = t.resumable;
                    t.ack = t.resumable;
                }
                info!(dcc_id = id, nick = %nick, "resume accepted");
                if let Err(e) = self.start_recv(prefs, id, our_ip) {
                    debug!(dcc_id = id, error = %e, "cannot start transfer");
                }
            }
        }
    }

    fn malformed(&mut self, nick: &str, reason: &str) {
        warn!(nick = %nick, reason, "rejected DCC request");
        self.print(TextEvent::DccMalformed {
            nick: nick.to_owned(),
            reason: reason.to_owned(),
        });
    }

    /// A real address answering one of our passive offers.
    fn passive_reply(
        &self,
        server: ServerId,
        nick: &str,
        kind: DccType,
        port: u16,
        pasvid: Option<u32>,
    ) -> Option<DccId> {
        let pasvid = pasvid?;
        if port == 0 {
            return None;
        }
        self.transfers
            .iter()
            .find(|t| {
                t.kind == kind
                    && t.passive
                    && t.server == server
                    && t.state == DccState::Queued
                    && t.pasvid == Some(pasvid)
                    && slirc_proto::irc_eq(&t.nick, nick)
            })
            .map(|t| t.id)
    }

    #[allow(clippy::too_many_arguments)]
    fn incoming_send(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        file: &str,
        addr: DccAddr,
        port: u16,
        size: u64,
        pasvid: Option<u32>,
        our_ip: Option<IpAddr>,
    ) {
        let mut t = Transfer::new(0, DccType::Recv, server, nick, Instant::now());
        t.file = sanitize_name(file);
        t.size = size;
        t.addr = (!addr.is_unspecified()).then_some(addr.0);
        t.port = port;
        t.pasvid = pasvid;
        t.passive = port == 0;
        let (path, resumable, resume_error) = self.destination(prefs, nick, file, size);
        t.path = path;
        t.resumable = resumable;
        t.resume_error = resume_error;

        let shown = t.file.clone();
        let id = self.push_transfer(t);
        info!(dcc_id = id, nick = %nick, file = %shown, size, resumable, "incoming file");
        self.print(TextEvent::DccOffer {
            nick: nick.to_owned(),
            file: shown.clone(),
            size,
        });
        if resume_error == Some(ResumeError::InProgressElsewhere) {
            self.print(TextEvent::DccResumeInProgress { file: shown.clone() });
        }

        if prefs.get_int("dcc_auto_recv") == 2 {
            if let Err(e) = self.accept(prefs, id, our_ip) {
                self.print(TextEvent::Error(e.to_string()));
            }
        } else {
            self.actions.push(DccAction::AskAccept {
                id,
                prompt: format!("{} is offering \"{}\". Accept it?", nick, shown),
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn incoming_chat(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        addr: DccAddr,
        port: u16,
        pasvid: Option<u32>,
        our_ip: Option<IpAddr>,
    ) {
        let mut t = Transfer::new(0, DccType::ChatRecv, server, nick, Instant::now());
        t.addr = (!addr.is_unspecified()).then_some(addr.0);
        t.port = port;
        t.pasvid = pasvid;
        t.passive = port == 0;
        let id = self.push_transfer(t);
        info!(dcc_id = id, nick = %nick, "incoming chat");
        self.print(TextEvent::DccChatOffer {
            nick: nick.to_owned(),
        });

        if prefs.get_int("dcc_auto_chat") != 0 {
            if let Err(e) = self.accept(prefs, id, our_ip) {
                self.print(TextEvent::Error(e.to_string()));
            }
        } else {
            self.actions.push(DccAction::AskAccept {
                id,
                prompt: format!("{} wants to chat. Accept?", nick),
            });
        }
    }

    /// The receiver of one of our SENDs asked to resume at `pos`.
    fn resume_requested(
        &mut self,
        server: ServerId,
        nick: &str,
        file: &str,
        port: u16,
        pos: u64,
        pasvid: Option<u32>,
    ) {
        let found = self.transfers.iter_mut().find(|t| {
            t.kind == DccType::Send
                && t.server == server
                && t.state == DccState::Queued
                && slirc_proto::irc_eq(&t.nick, nick)
                && matches_port(t, port, pasvid)
        });
        let Some(t) = found else {
            return self.malformed(nick, "RESUME for an unknown transfer");
        };
        if pos >= t.size {
            return self.malformed(nick, "resume position past the end of the file");
        }
        t.pos = pos;
        t.ack = pos;
        t.resumable = pos;
        t.resumed = true;
        let (id, shown) = (t.id, t.file.clone());
        info!(dcc_id = id, nick = %nick, pos, "resume requested");

        let reply = DccRequest::Accept {
            file: file.to_owned(),
            port,
            pos,
            pasvid,
        };
        self.ctcp(server, nick, format!("DCC {}", reply));
        self.print(TextEvent::DccResumeRequest {
            nick: nick.to_owned(),
            file: shown,
            pos,
        });
        self.actions.push(DccAction::Update(id));
    }

    /// Accept an incoming offer (`/dcc get`, `/dcc chat nick`, or a yes from
    /// the frontend). A terminal RECV starts over.
    pub fn accept(&mut self, prefs: &Prefs, id: DccId, our_ip: Option<IpAddr>) -> Result<(), DccError> {
        // Checked before the restart below makes this transfer live again.
        let busy = self
            .get(id)
            .is_some_and(|t| t.state.is_terminal() && self.in_progress_elsewhere(&t.path));
        let t = self
            .get_mut(id)
            .ok_or_else(|| DccError::NoSuchTransfer(id.to_string()))?;
        match t.kind {
            DccType::Recv => {
                if t.state.is_terminal() {
                    t.state = DccState::Queued;
                    t.pos = 0;
                    t.ack = 0;
                    t.resumed = false;
                    t.error = None;
                    t.offer_time = Instant::now();
                    t.resumable = fs::metadata(&t.path)
                        .map(|m| m.len())
                        .ok()
                        .filter(|len| !busy && *len < t.size)
                        .unwrap_or(0);
                    t.resume_error = busy.then_some(ResumeError::InProgressElsewhere);
                }
                if t.state != DccState::Queued {
                    return Ok(());
                }
                if t.resumable > 0 && t.resume_error.is_none() && prefs.get_bool("dcc_auto_resume") {
                    self.request_resume(id);
                    Ok(())
                } else {
                    self.start_recv(prefs, id, our_ip)
                }
            }
            DccType::ChatRecv if t.state == DccState::Queued => self.start_recv(prefs, id, our_ip),
            DccType::ChatRecv => Ok(()),
            _ => Err(DccError::NoSuchTransfer(id.to_string())),
        }
    }

    /// `/dcc resume`: ask the sender to continue where our file ends.
    pub fn resume(&mut self, id: DccId) -> Result<(), DccError> {
        let t = self
            .get(id)
            .ok_or_else(|| DccError::NoSuchTransfer(id.to_string()))?;
        if t.kind != DccType::Recv || t.state != DccState::Queued {
            return Err(DccError::NotResumable(t.file.clone()));
        }
        if t.resume_error == Some(ResumeError::InProgressElsewhere) {
            let file = t.file.clone();
            self.print(TextEvent::DccResumeInProgress { file: file.clone() });
            return Err(DccError::NotResumable(file));
        }
        if t.resumable == 0 || t.resume_error.is_some() {
            return Err(DccError::NotResumable(t.file.clone()));
        }
        self.request_resume(id);
        Ok(())
    }

    fn request_resume(&mut self, id: DccId) {
        let Some(t) = self.get_mut(id) else { return };
        t.resumed = true;
        let request = DccRequest::Resume {
            file: t.file.clone(),
            port: t.port,
            pos: t.resumable,
            pasvid: if t.passive { t.pasvid } else { None },
        };
        let (server, nick) = (t.server, t.nick.clone());
        debug!(dcc_id = id, pos = t.resumable, "requesting resume");
        self.ctcp(server, &nick, format!("DCC {}", request));
    }

    /// Connect to the offer, or for a passive offer listen and tell the
    /// peer where.
    fn start_recv(&mut self, prefs: &Prefs, id: DccId, our_ip: Option<IpAddr>) -> Result<(), DccError> {
        let Some(t) = self.get(id) else {
            return Err(DccError::NoSuchTransfer(id.to_string()));
        };
        if !t.passive {
            return match t.addr {
                Some(ip) => {
                    let port = t.port;
                    self.connect_to(prefs, id, ip, port);
                    Ok(())
                }
                None => Err(DccError::Malformed {
                    nick: t.nick.clone(),
                    reason: String::from("no address to connect to"),
                }),
            };
        }

        let Some(ip) = our_ip else {
            self.fail(prefs, id, DccError::NotConnected.to_string());
            return Err(DccError::NotConnected);
        };
        let listener = match bind_listener(prefs, ip) {
            Ok(listener) => listener,
            Err(e) => {
                self.fail(prefs, id, e.to_string());
                return Err(e);
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.fail(prefs, id, e.to_string());
                return Err(DccError::Listen(e));
            }
        };

        let Some(t) = self.get_mut(id) else {
            return Err(DccError::NoSuchTransfer(id.to_string()));
        };
        t.state = DccState::Connecting;
        let reply = match t.kind {
            DccType::ChatRecv => DccRequest::Chat {
                addr: DccAddr(ip),
                port,
                pasvid: t.pasvid,
            },
            _ => DccRequest::Send {
                file: t.file.clone(),
                addr: DccAddr(ip),
                port,
                size: t.size,
                pasvid: t.pasvid,
            },
        };
        let (server, nick) = (t.server, t.nick.clone());
        self.spawn_accept(id, listener);
        self.ctcp(server, &nick, format!("DCC {}", reply));
        self.actions.push(DccAction::Update(id));
        Ok(())
    }

    /// Outbound connect for a RECV, a CHAT, or the answer to our passive
    /// offer.
    fn connect_to(&mut self, prefs: &Prefs, id: DccId, ip: IpAddr, port: u16) {
        let proxy = ProxyConfig::from_prefs(prefs).filter(|p| p.applies_to_dcc());
        let timeout = Duration::from_secs(prefs.get_int("net_connect_timeout").max(1) as u64);
        let bind = prefs.get_str("net_bind_host").parse().ok();

        let Some(t) = self.get_mut(id) else { return };
        t.addr = Some(ip);
        t.port = port;
        t.state = DccState::Connecting;
        let event = TextEvent::DccConnecting {
            kind: t.kind,
            nick: t.nick.clone(),
            file: t.label().to_owned(),
        };
        self.spawn_connect(id, (ip, port).into(), proxy, bind, timeout);
        self.print(event);
        self.actions.push(DccAction::Update(id));
    }
}

impl DccEngine {
    /// Open a RECV's file for writing at its current position. A file that
    /// another transfer is writing gets a fresh name first.
    pub(super) fn open_destination(&mut self, id: DccId) -> std::io::Result<fs::File> {
        let Some(t) = self.get_mut(id) else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "transfer gone"));
        };
        let mut renamed = None;
        if t.resume_error == Some(ResumeError::InProgressElsewhere) {
            let fresh = unique_path(&t.path);
            renamed = Some((t.path.display().to_string(), fresh.display().to_string()));
            t.path = fresh;
            t.pos = 0;
            t.ack = 0;
            t.resume_error = None;
        }
        if let Some(parent) = t.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = if t.pos > 0 {
            let mut file = fs::OpenOptions::new().write(true).open(&t.path)?;
            file.set_len(t.pos)?;
            file.seek(SeekFrom::Start(t.pos))?;
            file
        } else {
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&t.path)?
        };
        if let Some((old, new)) = renamed {
            self.print(TextEvent::DccRenamed { old, new });
        }
        Ok(file)
    }
}

/// A RESUME/ACCEPT names the transfer by port, or by passive id when the
/// port is 0.
fn matches_port(t: &Transfer, port: u16, pasvid: Option<u32>) -> bool {
    if port == 0 {
        pasvid.is_some() && t.pasvid == pasvid
    } else {
        t.port == port
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::dcc::tests::engine;

    fn send_offer(file: &str, port: u16, size: u64, pasvid: Option<u32>) -> DccRequest {
        DccRequest::Send {
            file: file.to_owned(),
            addr: DccAddr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
            port,
            size,
            pasvid,
        }
    }

    fn prefs_in(dir: &Path) -> Prefs {
        let mut prefs = Prefs::default();
        prefs.set("dcc_dir", dir.to_str().unwrap()).unwrap();
        prefs
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("C:\\temp\\a.txt"), "a.txt");
        assert_eq!(sanitize_name(".."), "file");
        assert_eq!(sanitize_name("plain.bin"), "plain.bin");
    }

    #[test]
    fn test_endpoint_checks() {
        let real = DccAddr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(check_endpoint(real, 0, None).is_err());
        assert!(check_endpoint(DccAddr::UNSPECIFIED, 0, Some(3)).is_ok());
        assert!(check_endpoint(real, 80, None).is_err());
        assert!(check_endpoint(DccAddr::UNSPECIFIED, 5000, None).is_err());
        assert!(check_endpoint(real, 5000, None).is_ok());
    }

    #[tokio::test]
    async fn test_offer_rejected_when_implausible() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());
        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("a", 21, 10, None), None);
        assert!(engine.transfers().is_empty());
        let actions = engine.take_actions();
        assert!(actions.iter().any(|a| matches!(
            a,
            DccAction::Print { event: TextEvent::DccMalformed { .. }, .. }
        )));
    }

    #[tokio::test]
    async fn test_partial_file_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.iso"), vec![0u8; 40]).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());

        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("big.iso", 5000, 100, None), None);
        let t = &engine.transfers()[0];
        assert_eq!(t.resumable, 40);
        assert_eq!(t.path, dir.path().join("big.iso"));
        assert_eq!(t.state, DccState::Queued);
        assert!(
            engine
                .take_actions()
                .iter()
                .any(|a| matches!(a, DccAction::AskAccept { .. }))
        );
    }

    #[tokio::test]
    async fn test_complete_file_gets_new_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("done.txt"), b"0123456789").unwrap();
        fs::write(dir.path().join("done.txt.1"), b"x").unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());

        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("done.txt", 5000, 10, None), None);
        let t = &engine.transfers()[0];
        assert_eq!(t.path, dir.path().join("done.txt.2"));
        assert_eq!(t.resumable, 0);
        assert_eq!(t.resume_error, Some(ResumeError::AlreadyComplete));
    }

    #[tokio::test]
    async fn test_second_offer_for_same_file_in_progress_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.bin"), vec![1u8; 10]).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());

        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("x.bin", 5000, 50, None), None);
        engine.handle_ctcp(&prefs, ServerId(1), "carol", send_offer("x.bin", 5001, 50, None), None);

        let second = &engine.transfers()[0];
        let first = &engine.transfers()[1];
        assert_eq!(first.resumable, 10);
        assert_eq!(first.resume_error, None);
        assert_eq!(second.path, first.path);
        assert_eq!(second.resumable, 0);
        assert_eq!(second.resume_error, Some(ResumeError::InProgressElsewhere));
    }

    #[tokio::test]
    async fn test_save_nick_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _rx) = engine(dir.path());
        let mut prefs = prefs_in(dir.path());
        prefs.set_bool("dcc_save_nick", true).unwrap();
        let (path, _, _) = engine.destination(&prefs, "bob", "a.txt", 1);
        assert_eq!(path, dir.path().join("bob").join("a.txt"));
    }

    #[tokio::test]
    async fn test_accept_requests_resume() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part.bin"), vec![0u8; 30]).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());
        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("part.bin", 5000, 100, None), None);
        let id = engine.transfers()[0].id;
        engine.take_actions();

        engine.accept(&prefs, id, None).unwrap();
        let actions = engine.take_actions();
        assert!(actions.contains(&DccAction::Ctcp {
            server: ServerId(1),
            nick: "bob".into(),
            body: "DCC RESUME part.bin 5000 30".into(),
        }));
        assert_eq!(engine.get(id).unwrap().state, DccState::Queued);
    }

    #[tokio::test]
    async fn test_restart_after_failure_resumes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("done.txt"), vec![0u8; 100]).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = prefs_in(dir.path());
        engine.handle_ctcp(&prefs, ServerId(1), "bob", send_offer("done.txt", 5000, 100, None), None);
        let id = engine.transfers()[0].id;
        assert_eq!(engine.get(id).unwrap().resume_error, Some(ResumeError::AlreadyComplete));
        engine.take_actions();

        // the fresh copy died halfway
        fs::write(dir.path().join("done.txt.1"), vec![0u8; 40]).unwrap();
        engine.get_mut(id).unwrap().state = DccState::Failed;

        engine.accept(&prefs, id, None).unwrap();
        let t = engine.get(id).unwrap();
        assert_eq!((t.resumable, t.resume_error), (40, None));
        assert!(engine.take_actions().contains(&DccAction::Ctcp {
            server: ServerId(1),
            nick: "bob".into(),
            body: "DCC RESUME done.txt 5000 40".into(),
        }));
    }

    #[tokio::test]
    async fn test_resume_request_for_our_send() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("song.ogg");
        fs::write(&src, vec![7u8; 64]).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let id = engine
            .offer_send(&prefs, ServerId(1), "bob", src.to_str().unwrap(), true, None)
            .unwrap()[0];
        let pasvid = engine.get(id).unwrap().pasvid;
        engine.take_actions();

        let resume = DccRequest::Resume {
            file: "song.ogg".into(),
            port: 0,
            pos: 16,
            pasvid,
        };
        engine.handle_ctcp(&prefs, ServerId(1), "bob", resume, None);
        let t = engine.get(id).unwrap();
        assert_eq!((t.pos, t.ack, t.resumable), (16, 16, 16));
        let actions = engine.take_actions();
        assert!(actions.contains(&DccAction::Ctcp {
            server: ServerId(1),
            nick: "bob".into(),
            body: format!("DCC ACCEPT song.ogg 0 16 {}", pasvid.unwrap()),
        }));

        // past the end is refused
        let resume = DccRequest::Resume {
            file: "song.ogg".into(),
            port: 0,
            pos: 64,
            pasvid,
        };
        engine.handle_ctcp(&prefs, ServerId(1), "bob", resume, None);
        assert_eq!(engine.get(id).unwrap().pos, 16);
    }
}
