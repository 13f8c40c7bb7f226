//! A server that accepts TCP but never speaks TLS.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingFrontend, TestServer, pump_until};
use slirc::error::ConnectError;
use slirc::net::{DnsCache, Resolver, TlsOptions};
use slirc::notify::NotifyEngine;
use slirc::prefs::{NetworkList, Prefs};
use slirc::server::{ConnEvent, ConnectParams, LinkState, ServerId, connection};
use slirc::{Client, Focus};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_handshake_timeout_fails_connection() {
    let server = TestServer::bind().await.unwrap();
    let port = server.port();
    let silent = tokio::spawn(async move {
        let stream = server.accept_silent().await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
        anyhow::Ok(())
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let params = ConnectParams {
        host: String::from("127.0.0.1"),
        port,
        tls: Some(TlsOptions::default()),
        proxy: None,
        bind: None,
        connect_timeout: Duration::from_secs(5),
        ssl_timeout: Duration::from_millis(300),
        encoding: slirc_proto::UTF_8,
    };
    let _handle = connection::spawn(
        ServerId(1),
        1,
        params,
        Arc::new(Resolver::new()),
        Arc::new(DnsCache::default()),
        tx,
    );

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .expect("channel closed");
    assert_eq!(msg.server, ServerId(1));
    assert_eq!(msg.r#gen, 1);
    assert!(matches!(msg.event, ConnEvent::Failed(ConnectError::TlsTimeout)));
    silent.abort();
}

#[tokio::test]
async fn test_handshake_timeout_reported_to_user() {
    let server = TestServer::bind().await.unwrap();
    let port = server.port();
    let silent = tokio::spawn(async move {
        let stream = server.accept_silent().await?;
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
        anyhow::Ok(())
    });

    let mut prefs = Prefs::default();
    prefs.set_int("net_ssl_timeout", 1).unwrap();
    let frontend = RecordingFrontend::new(std::env::temp_dir());
    let mut client = Client::new(
        prefs,
        NetworkList::default(),
        NotifyEngine::new(),
        Box::new(frontend.clone()),
    );
    client.input(&Focus::default(), &format!("/server -ssl 127.0.0.1 {}", port));
    let id = client.servers[0].id;
    assert!(client.server(id).unwrap().tls);

    pump_until(&mut client, Duration::from_secs(5), |_| frontend.saw("handshake timed out")).await;
    let server = client.server(id).unwrap();
    assert_eq!(server.link, LinkState::Failed);
    // no reconnect unless net_auto_reconnect_on_fail is set
    assert!(server.reconnect.is_none());
    silent.abort();
}
