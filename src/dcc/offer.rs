//! Outgoing offers: `/dcc send`, `/dcc psend`, `/dcc chat`.

use std::fs::File;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener};
use std::path::Path;
use std::time::Instant;

use rand::Rng;
use slirc_proto::{DccAddr, DccRequest};
use tracing::{debug, info, warn};

use super::{DccEngine, DccId, DccState, DccType, Transfer};
use crate::error::DccError;
use crate::events::TextEvent;
use crate::prefs::{Prefs, expand_home};
use crate::server::ServerId;

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Bind a listener on `dcc_port_first..=dcc_port_last`, or any port when
/// the range is unset.
pub(super) fn bind_listener(prefs: &Prefs, ip: IpAddr) -> Result<TcpListener, DccError> {
    let any: IpAddr = if ip.is_ipv6() {
        Ipv6Addr::UNSPECIFIED.into()
    } else {
        Ipv4Addr::UNSPECIFIED.into()
    };
    let first = prefs.get_int("dcc_port_first").clamp(0, 65535) as u16;
    let last = prefs.get_int("dcc_port_last").clamp(0, 65535) as u16;

    let listener = if first == 0 {
        TcpListener::bind((any, 0)).map_err(DccError::Listen)?
    } else {
        let mut last_err = None;
        let mut bound = None;
        for port in first..=last.max(first) {
            match TcpListener::bind((any, port)) {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        match bound {
            Some(listener) => listener,
            None => {
                return Err(DccError::Listen(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrInUse, "no free port in range")
                })));
            }
        }
    };
    listener.set_nonblocking(true).map_err(DccError::Listen)?;
    Ok(listener)
}

impl DccEngine {
    /// Next passive id. The first one is random in `1..=255`.
    pub(super) fn alloc_pasvid(&mut self) -> u32 {
        let id = match self.next_pasvid {
            Some(id) => id,
            None => rand::thread_rng().gen_range(1..=255),
        };
        self.next_pasvid = Some(id.checked_add(1).unwrap_or(1));
        id
    }

    /// Offer one file, or every file a wildcard matches.
    pub fn offer_send(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        path: &str,
        passive: bool,
        our_ip: Option<IpAddr>,
    ) -> Result<Vec<DccId>, DccError> {
        let expanded = expand_home(path);
        let pattern = expanded.to_string_lossy().into_owned();

        if !has_wildcard(&pattern) {
            return self
                .offer_file(prefs, server, nick, &expanded, passive, our_ip)
                .map(|id| vec![id]);
        }

        let entries = glob::glob(&pattern).map_err(|e| DccError::Pattern(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %e.path().display(), error = %e.error(), "cannot read wildcard match");
                    let text = format!("cannot read {}: {}", e.path().display(), e.error());
                    self.print(TextEvent::Error(text));
                    continue;
                }
            };
            // matches are offered as plain paths, never expanded again
            if entry.is_file() {
                ids.push(self.offer_file(prefs, server, nick, &entry, passive, our_ip)?);
            }
        }
        if ids.is_empty() {
            return Err(DccError::NoMatch(path.to_owned()));
        }
        Ok(ids)
    }

    fn offer_file(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        path: &Path,
        passive: bool,
        our_ip: Option<IpAddr>,
    ) -> Result<DccId, DccError> {
        let shown = path.display().to_string();
        let meta = std::fs::metadata(path).map_err(|e| DccError::File(shown.clone(), e))?;
        if meta.is_dir() {
            return Err(DccError::IsDirectory(shown));
        }
        if meta.len() == 0 {
            return Err(DccError::EmptyFile(shown));
        }
        let source = File::open(path).map_err(|e| DccError::File(shown.clone(), e))?;

        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(shown);
        if prefs.get_bool("dcc_send_fillspaces") {
            name = name.replace(' ', "_");
        }

        let mut t = Transfer::new(0, DccType::Send, server, nick, Instant::now());
        t.file = name;
        t.path = path.to_path_buf();
        t.size = meta.len();
        t.source = Some(source);
        t.passive = passive;

        let (request, listener) = if passive {
            let pasvid = self.alloc_pasvid();
            t.pasvid = Some(pasvid);
            let request = DccRequest::Send {
                file: t.file.clone(),
                addr: DccAddr::UNSPECIFIED,
                port: 0,
                size: t.size,
                pasvid: Some(pasvid),
            };
            (request, None)
        } else {
            let ip = our_ip.ok_or(DccError::NotConnected)?;
            let listener = bind_listener(prefs, ip)?;
            t.port = listener.local_addr().map_err(DccError::Listen)?.port();
            t.addr = Some(ip);
            let request = DccRequest::Send {
                file: t.file.clone(),
                addr: DccAddr(ip),
                port: t.port,
                size: t.size,
                pasvid: None,
            };
            (request, Some(listener))
        };

        let (file, size) = (t.file.clone(), t.size);
        let id = self.push_transfer(t);
        if let Some(listener) = listener {
            self.spawn_accept(id, listener);
        }
        info!(dcc_id = id, nick = %nick, file = %file, size, passive, "offering file");
        self.ctcp(server, nick, format!("DCC {}", request));
        self.print(TextEvent::DccOffered {
            nick: nick.to_owned(),
            file,
        });
        Ok(id)
    }

    /// Offer a chat. An existing live chat with `nick` is reused.
    pub fn offer_chat(
        &mut self,
        prefs: &Prefs,
        server: ServerId,
        nick: &str,
        passive: bool,
        our_ip: Option<IpAddr>,
    ) -> Result<DccId, DccError> {
        if let Some(existing) = self.transfers.iter().find(|t| {
            t.kind.is_chat() && !t.state.is_terminal() && slirc_proto::irc_eq(&t.nick, nick)
        }) {
            let id = existing.id;
            if existing.kind == DccType::ChatRecv && existing.state == DccState::Queued {
                return self.accept(prefs, id, our_ip).map(|()| id);
            }
            debug!(dcc_id = id, nick = %nick, "chat already open");
            self.print(TextEvent::Info(format!("Already offering CHAT to {}", nick)));
            return Ok(id);
        }

        let mut t = Transfer::new(0, DccType::ChatSend, server, nick, Instant::now());
        t.passive = passive;
        let (request, listener) = if passive {
            let pasvid = self.alloc_pasvid();
            t.pasvid = Some(pasvid);
            let request = DccRequest::Chat {
                addr: DccAddr::UNSPECIFIED,
                port: 0,
                pasvid: Some(pasvid),
            };
            (request, None)
        } else {
            let ip = our_ip.ok_or(DccError::NotConnected)?;
            let listener = bind_listener(prefs, ip)?;
            t.port = listener.local_addr().map_err(DccError::Listen)?.port();
            t.addr = Some(ip);
            let request = DccRequest::Chat {
                addr: DccAddr(ip),
                port: t.port,
                pasvid: None,
            };
            (request, Some(listener))
        };

        let id = self.push_transfer(t);
        if let Some(listener) = listener {
            self.spawn_accept(id, listener);
        }
        info!(dcc_id = id, nick = %nick, passive, "offering chat");
        self.ctcp(server, nick, format!("DCC {}", request));
        self.print(TextEvent::DccChatOffered {
            nick: nick.to_owned(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::dcc::DccAction;
    use crate::dcc::tests::engine;

    fn ctcp_bodies(engine: &mut DccEngine) -> Vec<String> {
        engine
            .take_actions()
            .into_iter()
            .filter_map(|a| match a {
                DccAction::Ctcp { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_passive_send_announce() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), b"0123456789").unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let path = dir.path().join("file.txt");

        engine
            .offer_send(&prefs, ServerId(1), "bob", path.to_str().unwrap(), true, None)
            .unwrap();
        let first = ctcp_bodies(&mut engine);
        assert_eq!(first.len(), 1);
        let words: Vec<&str> = first[0].split(' ').collect();
        assert_eq!(&words[..6], &["DCC", "SEND", "file.txt", "0", "0", "10"]);
        let pasvid: u32 = words[6].parse().unwrap();
        assert!((1..=255).contains(&pasvid));

        engine
            .offer_send(&prefs, ServerId(1), "bob", path.to_str().unwrap(), true, None)
            .unwrap();
        let second = ctcp_bodies(&mut engine);
        let next: u32 = second[0].rsplit(' ').next().unwrap().parse().unwrap();
        assert_eq!(next, pasvid + 1);
    }

    #[tokio::test]
    async fn test_active_send_listens() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("my file.bin"), b"abc").unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let path = dir.path().join("my file.bin");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let ids = engine
            .offer_send(&prefs, ServerId(1), "bob", path.to_str().unwrap(), false, Some(ip))
            .unwrap();
        let t = engine.get(ids[0]).unwrap();
        assert_eq!(t.state, DccState::Queued);
        assert_ne!(t.port, 0);
        let port = t.port;
        let body = &ctcp_bodies(&mut engine)[0];
        assert_eq!(
            body,
            &format!("DCC SEND my_file.bin {} {} 3", u32::from(Ipv4Addr::LOCALHOST), port)
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_dirs_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let send = |engine: &mut DccEngine, p: &Path| {
            engine.offer_send(&prefs, ServerId(1), "bob", p.to_str().unwrap(), true, None)
        };

        assert!(matches!(send(&mut engine, dir.path()), Err(DccError::IsDirectory(_))));
        assert!(matches!(
            send(&mut engine, &dir.path().join("empty")),
            Err(DccError::EmptyFile(_))
        ));
        assert!(matches!(
            send(&mut engine, &dir.path().join("missing")),
            Err(DccError::File(..))
        ));
        assert!(matches!(
            send(&mut engine, &dir.path().join("*.none")),
            Err(DccError::NoMatch(_))
        ));
        assert!(engine.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_offers_each_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.log", "b.log", "c.txt"] {
            std::fs::write(dir.path().join(name), b"data").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.log")).unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let pattern = dir.path().join("*.log");

        let ids = engine
            .offer_send(&prefs, ServerId(1), "bob", pattern.to_str().unwrap(), true, None)
            .unwrap();
        assert_eq!(ids.len(), 2);
        let mut files: Vec<_> = ids.iter().map(|id| engine.get(*id).unwrap().file.clone()).collect();
        files.sort();
        assert_eq!(files, ["a.log", "b.log"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wildcard_reports_unreadable_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let (open, locked) = (dir.path().join("open"), dir.path().join("locked"));
        for sub in [&open, &locked] {
            std::fs::create_dir(sub).unwrap();
            std::fs::write(sub.join("a.txt"), b"data").unwrap();
        }
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            // running privileged, nothing is unreadable
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let (mut engine, _rx) = engine(dir.path());
        let pattern = dir.path().join("*").join("*.txt");

        let ids = engine
            .offer_send(&Prefs::default(), ServerId(1), "bob", pattern.to_str().unwrap(), true, None)
            .unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(engine.take_actions().iter().any(|a| matches!(
            a,
            DccAction::Print { event: TextEvent::Error(text), .. } if text.contains("locked")
        )));
    }

    #[tokio::test]
    async fn test_passive_chat_announce() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx) = engine(dir.path());
        let prefs = Prefs::default();
        let id = engine.offer_chat(&prefs, ServerId(1), "bob", true, None).unwrap();
        let pasvid = engine.get(id).unwrap().pasvid.unwrap();
        assert_eq!(ctcp_bodies(&mut engine), [format!("DCC CHAT chat 0 0 {}", pasvid)]);

        // second offer reuses the pending one
        assert_eq!(engine.offer_chat(&prefs, ServerId(1), "BOB", true, None).unwrap(), id);
    }
}
