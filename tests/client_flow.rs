//! End-to-end client tests against a scripted IRC server.

mod common;

use std::time::{Duration, Instant};

use common::{RecordingFrontend, TestServer, pump_until};
use slirc::notify::NotifyEngine;
use slirc::prefs::{NetworkList, Prefs};
use slirc::server::LinkState;
use slirc::{Client, Focus};

fn client(networks: &str, prefs: Prefs) -> (Client, RecordingFrontend) {
    let dir = std::env::temp_dir();
    let frontend = RecordingFrontend::new(dir);
    let client = Client::new(
        prefs,
        NetworkList::parse(networks).expect("network list"),
        NotifyEngine::new(),
        Box::new(frontend.clone()),
    );
    (client, frontend)
}

fn unthrottled() -> Prefs {
    let mut prefs = Prefs::default();
    prefs.set_bool("net_throttle", false).unwrap();
    prefs
}

#[tokio::test]
async fn test_login_autojoin_and_messages() {
    let server = TestServer::bind().await.unwrap();
    let networks = format!(
        r##"
[[network]]
name = "TestNet"
autojoin = ["#rust", "#slirc key"]

[[network.server]]
host = "127.0.0.1"
port = {}
"##,
        server.port()
    );

    let script = tokio::spawn(async move {
        let mut conn = server.accept().await?;
        let login = conn.register("slirc").await?;
        let joins = conn.recv_until(|l| l.starts_with("JOIN #slirc")).await?;
        conn.send_raw(":slirc!u@127.0.0.1 JOIN #rust").await?;
        conn.send_raw(":bob!b@example.net PRIVMSG #rust :hello slirc").await?;
        let said = conn.recv_until(|l| l.starts_with("PRIVMSG #rust")).await?;
        anyhow::Ok((login, joins, said))
    });

    let (mut client, frontend) = client(&networks, unthrottled());
    client.input(&Focus::default(), "/server TestNet");
    let id = client.servers[0].id;

    pump_until(&mut client, Duration::from_secs(10), |c| {
        c.server(id)
            .and_then(|s| s.session("#rust"))
            .is_some_and(|s| s.joined)
    })
    .await;
    pump_until(&mut client, Duration::from_secs(10), |_| frontend.saw("hello slirc")).await;
    client.input(&Focus::session(id, "#rust"), "hi bob");
    pump_until(&mut client, Duration::from_secs(10), |_| script.is_finished()).await;

    let (login, joins, said) = script.await.unwrap().unwrap();
    assert!(login.iter().any(|l| l == "NICK slirc"));
    assert!(login.iter().any(|l| l == "USER slirc 0 * :slirc user"));
    assert!(joins.iter().any(|l| l == "JOIN #rust"));
    assert!(joins.iter().any(|l| l == "JOIN #slirc key"));
    assert_eq!(said.last().map(String::as_str), Some("PRIVMSG #rust :hi bob"));

    let server = client.server(id).unwrap();
    assert_eq!(server.link, LinkState::Registered);
    assert_eq!(server.network_label(), "TestNet");
    assert!(frontend.saw("Connected to 127.0.0.1"));
}

#[tokio::test]
async fn test_ping_timeout_reconnects_and_rejoins() {
    let server = TestServer::bind().await.unwrap();
    let port = server.port();

    let script = tokio::spawn(async move {
        let mut first = server.accept().await?;
        first.register("slirc").await?;
        first.recv_until(|l| l == "JOIN #rust").await?;
        first.send_raw(":slirc!u@127.0.0.1 JOIN #rust").await?;

        // the client gives up on the silent link and comes back
        let mut second = server.accept().await?;
        second.register("slirc").await?;
        let lines = second.recv_until(|l| l.starts_with("JOIN")).await?;
        drop(first);
        anyhow::Ok(lines)
    });

    let mut prefs = unthrottled();
    prefs.set_int("net_ping_timeout", 1).unwrap();
    prefs.set_int("net_reconnect_delay", 0).unwrap();
    let (mut client, frontend) = client("", prefs);
    client.input(&Focus::default(), &format!("/server 127.0.0.1 {}", port));
    let id = client.servers[0].id;
    pump_until(&mut client, Duration::from_secs(10), |c| {
        c.server(id).is_some_and(|s| s.end_of_motd)
    })
    .await;
    client.input(&Focus::server(id), "/join #rust");

    pump_until(&mut client, Duration::from_secs(10), |c| {
        c.server(id)
            .and_then(|s| s.session("#rust"))
            .is_some_and(|s| s.joined)
    })
    .await;

    client.on_tick(Instant::now() + Duration::from_secs(5));
    assert!(frontend.saw("ping timeout"));
    assert!(frontend.saw("Reconnecting in 0.5 seconds"));

    pump_until(&mut client, Duration::from_secs(10), |_| script.is_finished()).await;
    let lines = script.await.unwrap().unwrap();
    assert_eq!(lines.last().map(String::as_str), Some("JOIN #rust"));
}

#[tokio::test]
async fn test_connect_failure_reported() {
    // bind then drop to get a port nobody listens on
    let port = TestServer::bind().await.unwrap().port();
    let (mut client, frontend) = client("", unthrottled());
    client.input(&Focus::default(), &format!("/server 127.0.0.1 {}", port));
    let id = client.servers[0].id;

    pump_until(&mut client, Duration::from_secs(10), |_| frontend.saw("failed")).await;
    let server = client.server(id).unwrap();
    assert_eq!(server.link, LinkState::Failed);
    assert!(server.reconnect.is_none());
}
