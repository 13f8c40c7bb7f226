//! Two DCC engines talking to each other over loopback. CTCPs one engine
//! queues are parsed and handed to the other, as the IRC server would.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slirc::dcc::{DccAction, DccEngine, DccEvent, DccState, DccType};
use slirc::events::TextEvent;
use slirc::net::{DnsCache, Resolver};
use slirc::prefs::Prefs;
use slirc::server::ServerId;
use slirc_proto::DccRequest;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

const SERVER: ServerId = ServerId(1);
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct Peer {
    nick: &'static str,
    engine: DccEngine,
    rx: mpsc::UnboundedReceiver<DccEvent>,
    prefs: Prefs,
    texts: Vec<TextEvent>,
}

impl Peer {
    fn new(nick: &'static str, dir: &Path) -> Self {
        let (engine, rx) = DccEngine::new(
            Arc::new(Resolver::new()),
            Arc::new(DnsCache::default()),
            dir.to_path_buf(),
        );
        let mut prefs = Prefs::default();
        prefs.set("dcc_dir", dir.to_str().unwrap()).unwrap();
        prefs.set_int("dcc_auto_recv", 2).unwrap();
        prefs.set_int("dcc_auto_chat", 1).unwrap();
        Peer {
            nick,
            engine,
            rx,
            prefs,
            texts: Vec::new(),
        }
    }

    fn newest_state(&self) -> Option<DccState> {
        self.engine.transfers().first().map(|t| t.state)
    }
}

/// Deliver `from`'s CTCPs to `to` and keep `from`'s printed text.
fn route(from: &mut Peer, to: &mut Peer) {
    for action in from.engine.take_actions() {
        match action {
            DccAction::Ctcp { body, .. } => {
                let request: DccRequest = body.parse().expect("valid DCC request");
                to.engine
                    .handle_ctcp(&to.prefs, SERVER, from.nick, request, Some(LOCALHOST));
            }
            DccAction::Print { event, .. } => from.texts.push(event),
            _ => {}
        }
    }
}

async fn run_until<F>(a: &mut Peer, b: &mut Peer, mut done: F)
where
    F: FnMut(&Peer, &Peer) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        route(a, b);
        route(b, a);
        if done(a, b) {
            return;
        }
        assert!(Instant::now() < deadline, "transfer did not finish");
        tokio::select! {
            Some(event) = a.rx.recv() => a.engine.handle_event(&a.prefs, event),
            Some(event) = b.rx.recv() => b.engine.handle_event(&b.prefs, event),
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }
}

fn both_done(a: &Peer, b: &Peer) -> bool {
    a.newest_state() == Some(DccState::Done) && b.newest_state() == Some(DccState::Done)
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn test_active_send_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let data = content(300_000);
    let source = write_source(&tmp.path().join("out"), "data.bin", &data);
    let mut alice = Peer::new("alice", &tmp.path().join("alice"));
    let mut bob = Peer::new("bob", &tmp.path().join("bob"));

    let ids = alice
        .engine
        .offer_send(&alice.prefs, SERVER, "bob", source.to_str().unwrap(), false, Some(LOCALHOST))
        .unwrap();
    assert_eq!(ids.len(), 1);

    run_until(&mut alice, &mut bob, both_done).await;

    let recv = &bob.engine.transfers()[0];
    assert_eq!(recv.kind, DccType::Recv);
    assert_eq!(recv.pos, data.len() as u64);
    assert_eq!(std::fs::read(&recv.path).unwrap(), data);
    assert_eq!(alice.engine.send_cps_sum, 0);
    assert_eq!(bob.engine.get_cps_sum, 0);
    assert!(bob.texts.iter().any(|e| matches!(e, TextEvent::DccComplete { .. })));

    // closing a finished transfer changes nothing
    let id = recv.id;
    bob.engine.close(&bob.prefs, id, DccState::Aborted, false);
    bob.engine.close(&bob.prefs, id, DccState::Failed, false);
    assert_eq!(bob.engine.get(id).unwrap().state, DccState::Done);
    assert_eq!(bob.engine.get_cps_sum, 0);
}

#[tokio::test]
async fn test_passive_send_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let data = content(70_000);
    let source = write_source(&tmp.path().join("out"), "notes.txt", &data);
    let mut alice = Peer::new("alice", &tmp.path().join("alice"));
    let mut bob = Peer::new("bob", &tmp.path().join("bob"));

    // passive offers do not need our address
    alice
        .engine
        .offer_send(&alice.prefs, SERVER, "bob", source.to_str().unwrap(), true, None)
        .unwrap();
    let offer = alice.engine.transfers()[0].pasvid;
    assert!(offer.is_some());

    run_until(&mut alice, &mut bob, both_done).await;

    let recv = &bob.engine.transfers()[0];
    assert!(recv.passive);
    assert_eq!(recv.pasvid, offer);
    assert_eq!(std::fs::read(&recv.path).unwrap(), data);
}

#[tokio::test]
async fn test_resume_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let data = content(200_000);
    let source = write_source(&tmp.path().join("out"), "movie.mkv", &data);
    let bob_dir = tmp.path().join("bob");
    write_source(&bob_dir, "movie.mkv", &data[..81_920]);

    let mut alice = Peer::new("alice", &tmp.path().join("alice"));
    let mut bob = Peer::new("bob", &bob_dir);

    alice
        .engine
        .offer_send(&alice.prefs, SERVER, "bob", source.to_str().unwrap(), false, Some(LOCALHOST))
        .unwrap();

    run_until(&mut alice, &mut bob, both_done).await;

    assert!(
        alice
            .texts
            .iter()
            .any(|e| matches!(e, TextEvent::DccResumeRequest { pos: 81_920, .. }))
    );
    let recv = &bob.engine.transfers()[0];
    assert!(recv.resumed);
    assert_eq!(recv.path, bob_dir.join("movie.mkv"));
    assert_eq!(std::fs::read(&recv.path).unwrap(), data);
}

#[tokio::test]
async fn test_chat_lines_arrive() {
    let tmp = tempfile::tempdir().unwrap();
    let mut alice = Peer::new("alice", &tmp.path().join("alice"));
    let mut bob = Peer::new("bob", &tmp.path().join("bob"));

    alice
        .engine
        .offer_chat(&alice.prefs, SERVER, "bob", false, Some(LOCALHOST))
        .unwrap();
    run_until(&mut alice, &mut bob, |a, b| {
        a.newest_state() == Some(DccState::Active) && b.newest_state() == Some(DccState::Active)
    })
    .await;
    assert_eq!(bob.engine.transfers()[0].kind, DccType::ChatRecv);

    alice.engine.send_chat("bob", "hello bob", "alice").unwrap();
    run_until(&mut alice, &mut bob, |_, b| {
        b.texts
            .iter()
            .any(|e| matches!(e, TextEvent::DccChatText { nick, text } if nick == "alice" && text == "hello bob"))
    })
    .await;
    assert!(
        alice
            .texts
            .iter()
            .any(|e| matches!(e, TextEvent::SelfMessage { nick, .. } if nick == "alice"))
    );

    let id = bob.engine.transfers()[0].id;
    bob.engine.abort(&bob.prefs, id).unwrap();
    assert_eq!(bob.engine.get(id).unwrap().state, DccState::Aborted);
}
