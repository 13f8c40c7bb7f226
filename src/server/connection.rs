//! The connection task: one per connect attempt.
//!
//! The task resolves, connects (directly or through a proxy), runs the TLS
//! handshake, then shuttles lines between the socket and the client loop.
//! Every event it reports carries the server id and the generation it was
//! spawned with, so the loop can drop events from a connection it already
//! cleaned up.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use slirc_proto::{Encoding, Line, LineCodec};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::ServerId;
use crate::error::ConnectError;
use crate::net::{self, DnsCache, ProxyConfig, ProxyTarget, Resolver, TlsOptions};

/// How long to wait for the peer to close after QUIT.
pub const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Plain or TLS transport.
pub enum IrcStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for IrcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IrcStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            IrcStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IrcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            IrcStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            IrcStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IrcStream::Plain(s) => Pin::new(s).poll_flush(cx),
            IrcStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IrcStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            IrcStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Everything the task needs to connect.
#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsOptions>,
    pub proxy: Option<ProxyConfig>,
    pub bind: Option<IpAddr>,
    pub connect_timeout: Duration,
    pub ssl_timeout: Duration,
    pub encoding: &'static Encoding,
}

#[derive(Debug)]
pub enum ConnEvent {
    /// TCP (and TLS) established.
    Connected { local: SocketAddr, peer: SocketAddr },
    /// Connect or handshake failed.
    Failed(ConnectError),
    /// One received line.
    Line(Line),
    /// The connection ended; `None` is a clean EOF.
    Closed(Option<String>),
}

#[derive(Debug)]
pub struct ConnMsg {
    pub server: ServerId,
    pub r#gen: u64,
    pub event: ConnEvent,
}

#[derive(Debug)]
pub enum ConnCommand {
    Send(String),
    SetEncoding(&'static Encoding),
    /// Send the line, then wait briefly for the peer to close.
    Quit(String),
}

/// Owner's side of a running connection task.
#[derive(Debug)]
pub struct ConnHandle {
    tx: mpsc::UnboundedSender<ConnCommand>,
    task: AbortHandle,
}

impl ConnHandle {
    pub fn send(&self, line: String) {
        let _ = self.tx.send(ConnCommand::Send(line));
    }

    pub fn set_encoding(&self, encoding: &'static Encoding) {
        let _ = self.tx.send(ConnCommand::SetEncoding(encoding));
    }

    pub fn quit(&self, line: String) {
        let _ = self.tx.send(ConnCommand::Quit(line));
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a connection task.
pub fn spawn(
    server: ServerId,
    r#gen: u64,
    params: ConnectParams,
    resolver: Arc<Resolver>,
    dns_cache: Arc<DnsCache>,
    events: mpsc::UnboundedSender<ConnMsg>,
) -> ConnHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let emit = |event| {
            let _ = events.send(ConnMsg { server, r#gen, event });
        };
        let stream = match open(&params, &resolver, &dns_cache).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(server = %params.host, error = %e, "connect failed");
                emit(ConnEvent::Failed(e));
                return;
            }
        };
        let (local, peer) = match &stream {
            IrcStream::Plain(s) => (s.local_addr(), s.peer_addr()),
            IrcStream::Tls(s) => (s.get_ref().0.local_addr(), s.get_ref().0.peer_addr()),
        };
        match (local, peer) {
            (Ok(local), Ok(peer)) => emit(ConnEvent::Connected { local, peer }),
            (Err(e), _) | (_, Err(e)) => {
                emit(ConnEvent::Failed(ConnectError::Io(e)));
                return;
            }
        }
        let reason = run(stream, params.encoding, rx, &emit).await;
        emit(ConnEvent::Closed(reason));
    });
    ConnHandle {
        tx,
        task: task.abort_handle(),
    }
}

async fn open(
    params: &ConnectParams,
    resolver: &Resolver,
    dns_cache: &DnsCache,
) -> Result<IrcStream, ConnectError> {
    let tcp = match params.proxy.as_ref().filter(|p| p.applies_to_irc()) {
        Some(proxy) => {
            net::connect_via(
                proxy,
                resolver,
                dns_cache,
                &ProxyTarget::from_host(&params.host),
                params.port,
                params.connect_timeout,
            )
            .await?
        }
        None => {
            let ip = resolver
                .lookup(&params.host)
                .await
                .ok_or_else(|| ConnectError::Resolve(params.host.clone()))?;
            let addr = SocketAddr::new(ip, params.port);
            info!(server = %params.host, %addr, "connecting");
            net::tcp_connect(addr, params.bind, params.connect_timeout)
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::TimedOut => ConnectError::Timeout,
                    _ => ConnectError::Io(e),
                })?
        }
    };
    let _ = tcp.set_nodelay(true);

    match &params.tls {
        Some(opts) => {
            let connector = net::connector(opts)?;
            let host = params.host.trim_start_matches('[').trim_end_matches(']');
            let stream = net::tls_handshake(&connector, tcp, host, params.ssl_timeout).await?;
            Ok(IrcStream::Tls(Box::new(stream)))
        }
        None => Ok(IrcStream::Plain(tcp)),
    }
}

/// Shuttle lines until the peer closes, the owner quits, or an error.
/// Returns the error text, `None` for a clean close.
async fn run(
    stream: IrcStream,
    encoding: &'static Encoding,
    mut rx: mpsc::UnboundedReceiver<ConnCommand>,
    emit: &impl Fn(ConnEvent),
) -> Option<String> {
    let mut codec = LineCodec::new();
    codec.set_encoding(encoding);
    let mut framed = Framed::new(stream, codec);

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(line)) => emit(ConnEvent::Line(line)),
                Some(Err(e)) => return Some(e.to_string()),
                None => return None,
            },
            cmd = rx.recv() => match cmd {
                Some(ConnCommand::Send(line)) => {
                    if let Err(e) = framed.send(line).await {
                        return Some(e.to_string());
                    }
                }
                Some(ConnCommand::SetEncoding(encoding)) => {
                    framed.codec_mut().set_encoding(encoding);
                }
                Some(ConnCommand::Quit(line)) => {
                    if let Err(e) = framed.send(line).await {
                        return Some(e.to_string());
                    }
                    let _ = tokio::time::timeout(QUIT_GRACE, async {
                        while let Some(Ok(line)) = framed.next().await {
                            emit(ConnEvent::Line(line));
                        }
                    })
                    .await;
                    debug!("closing after QUIT");
                    return None;
                }
                // Owner dropped the handle.
                None => return None,
            },
        }
    }
}
