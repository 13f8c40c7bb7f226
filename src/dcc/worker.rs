//! Transfer tasks: accepting, connecting, and the three data phases.
//!
//! A task owns its socket and (for files) its file handle. It never sees
//! the engine; progress goes out through a [`Reporter`], throttling comes
//! in through a `watch` channel.

use std::io::{Seek, SeekFrom};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use slirc_proto::{LineCodec, UTF_8, decode_line};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::{DccEngine, DccEvent, DccEventKind, DccId, DccState, DccType};
use crate::events::TextEvent;
use crate::net::{self, DnsCache, ProxyConfig, ProxyTarget, Resolver};
use crate::prefs::Prefs;

const RECV_BUFFER: usize = 16 * 1024;

/// Sends events for one transfer generation.
#[derive(Clone)]
pub(super) struct Reporter {
    id: DccId,
    r#gen: u64,
    tx: mpsc::UnboundedSender<DccEvent>,
}

impl Reporter {
    fn send(&self, kind: DccEventKind) {
        let _ = self.tx.send(DccEvent {
            id: self.id,
            r#gen: self.r#gen,
            kind,
        });
    }
}

/// Combine a 32-bit ack with the 64-bit send position.
pub(crate) fn combine_ack(pos: u64, ack32: u32) -> u64 {
    let ack = (pos & !0xFFFF_FFFF) | u64::from(ack32);
    if ack > pos {
        ack.checked_sub(1 << 32).unwrap_or(ack)
    } else {
        ack
    }
}

/// Wait until the throttle is clear. Returns early if the engine dropped
/// the sender.
async fn unthrottled(rx: &mut watch::Receiver<u8>) {
    while *rx.borrow_and_update() != 0 {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl DccEngine {
    fn reporter(&self, id: DccId) -> Option<Reporter> {
        self.get(id).map(|t| Reporter {
            id,
            r#gen: t.r#gen,
            tx: self.events_tx.clone(),
        })
    }

    pub(super) fn spawn_accept(&mut self, id: DccId, listener: std::net::TcpListener) {
        let Some(report) = self.reporter(id) else { return };
        let handle = tokio::spawn(accept(listener, report));
        if let Some(t) = self.get_mut(id) {
            t.task = Some(handle.abort_handle());
        }
    }

    pub(super) fn spawn_connect(
        &mut self,
        id: DccId,
        addr: SocketAddr,
        proxy: Option<ProxyConfig>,
        bind: Option<IpAddr>,
        timeout: Duration,
    ) {
        let Some(report) = self.reporter(id) else { return };
        let (resolver, cache) = (self.resolver.clone(), self.dns_cache.clone());
        let handle = tokio::spawn(connect(addr, proxy, bind, timeout, resolver, cache, report));
        if let Some(t) = self.get_mut(id) {
            if let Some(old) = t.task.replace(handle.abort_handle()) {
                old.abort();
            }
        }
    }

    /// The socket is up: go active and start the data phase.
    pub(super) fn on_connected(
        &mut self,
        prefs: &Prefs,
        id: DccId,
        stream: TcpStream,
        peer: SocketAddr,
        now: Instant,
    ) {
        let Some(report) = self.reporter(id) else { return };
        let Some(t) = self.get_mut(id) else { return };
        if !matches!(t.state, DccState::Queued | DccState::Connecting) {
            debug!(dcc_id = id, state = %t.state, "dropping late connection");
            return;
        }
        let _ = stream.set_nodelay(true);

        t.state = DccState::Active;
        t.addr = Some(peer.ip());
        t.last_activity = now;
        t.firstcpstime = None;
        t.lastcpstime = now;
        t.lastcpspos = if t.kind == DccType::Send { (t.pos + t.ack) / 2 } else { t.pos };
        t.cps = 0;
        t.throttled = 0;
        t.maxcps = match t.kind {
            DccType::Send => prefs.get_int("dcc_max_send_cps"),
            DccType::Recv => prefs.get_int("dcc_max_get_cps"),
            _ => 0,
        };
        info!(dcc_id = id, kind = %t.kind, nick = %t.nick, %peer, pos = t.pos, "dcc connected");
        let connected = TextEvent::DccConnected {
            kind: t.kind,
            nick: t.nick.clone(),
            file: t.label().to_owned(),
            peer: peer.ip().to_string(),
        };

        let (throttle_tx, throttle_rx) = watch::channel(0u8);
        let handle = match t.kind {
            DccType::Recv => {
                let file = match self.open_destination(id) {
                    Ok(file) => file,
                    Err(e) => return self.fail(prefs, id, e.to_string()),
                };
                let Some(t) = self.get_mut(id) else { return };
                tokio::spawn(recv_file(stream, file, t.pos, t.size, throttle_rx, report))
            }
            DccType::Send => {
                let source = match t.source.take() {
                    Some(file) => Ok(file),
                    None => std::fs::File::open(&t.path),
                };
                let (pos, size) = (t.pos, t.size);
                let file = match source.and_then(|mut f| f.seek(SeekFrom::Start(pos)).map(|_| f)) {
                    Ok(file) => file,
                    Err(e) => return self.fail(prefs, id, e.to_string()),
                };
                let fast = prefs.get_bool("dcc_fast_send");
                let blocksize = prefs.get_int("dcc_blocksize").clamp(256, 1 << 20) as usize;
                tokio::spawn(send_file(stream, file, pos, size, fast, blocksize, throttle_rx, report))
            }
            DccType::ChatSend | DccType::ChatRecv => {
                let (chat_tx, chat_rx) = mpsc::unbounded_channel();
                t.chat_tx = Some(chat_tx);
                tokio::spawn(chat(stream, chat_rx, report))
            }
        };

        if let Some(t) = self.get_mut(id) {
            t.task = Some(handle.abort_handle());
            t.throttle_tx = Some(throttle_tx);
        }
        self.print(connected);
        self.actions.push(super::DccAction::Update(id));
    }
}

async fn accept(listener: std::net::TcpListener, report: Reporter) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => return report.send(DccEventKind::Failed(e.to_string())),
    };
    match listener.accept().await {
        Ok((stream, peer)) => report.send(DccEventKind::Connected(stream, peer)),
        Err(e) => report.send(DccEventKind::Failed(e.to_string())),
    }
}

async fn connect(
    addr: SocketAddr,
    proxy: Option<ProxyConfig>,
    bind: Option<IpAddr>,
    timeout: Duration,
    resolver: Arc<Resolver>,
    cache: Arc<DnsCache>,
    report: Reporter,
) {
    let result = match &proxy {
        Some(proxy) => net::connect_via(
            proxy,
            &resolver,
            &cache,
            &ProxyTarget::Ip(addr.ip()),
            addr.port(),
            timeout,
        )
        .await
        .map_err(|e| e.to_string()),
        None => net::tcp_connect(addr, bind, timeout)
            .await
            .map_err(|e| e.to_string()),
    };
    match result {
        Ok(stream) => report.send(DccEventKind::Connected(stream, addr)),
        Err(e) => report.send(DccEventKind::Failed(e)),
    }
}

async fn recv_file(
    stream: TcpStream,
    file: std::fs::File,
    start: u64,
    size: u64,
    throttle: watch::Receiver<u8>,
    report: Reporter,
) {
    match recv_loop(stream, file, start, size, throttle, &report).await {
        Ok(pos) => report.send(DccEventKind::Done { pos, ack: pos }),
        Err(e) => report.send(DccEventKind::Failed(e)),
    }
}

/// Read, write to disk, ack the low 32 bits of the position.
async fn recv_loop(
    mut stream: TcpStream,
    file: std::fs::File,
    start: u64,
    size: u64,
    mut throttle: watch::Receiver<u8>,
    report: &Reporter,
) -> Result<u64, String> {
    let mut file = tokio::fs::File::from_std(file);
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut pos = start;

    while pos < size {
        unthrottled(&mut throttle).await;
        let n = stream.read(&mut buf).await.map_err(|e| e.to_string())?;
        if n == 0 {
            file.flush().await.map_err(|e| e.to_string())?;
            return Err(String::from("connection closed"));
        }
        file.write_all(&buf[..n]).await.map_err(|e| e.to_string())?;
        pos += n as u64;
        let ack = stream.write_all(&(pos as u32).to_be_bytes()).await;
        // the sender may hang up as soon as the last byte is out
        if let Err(e) = ack {
            if pos < size {
                return Err(e.to_string());
            }
        }
        report.send(DccEventKind::Progress { pos, ack: pos });
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(pos)
}

#[allow(clippy::too_many_arguments)]
async fn send_file(
    stream: TcpStream,
    file: std::fs::File,
    start: u64,
    size: u64,
    fast: bool,
    blocksize: usize,
    throttle: watch::Receiver<u8>,
    report: Reporter,
) {
    match send_loop(stream, file, start, size, fast, blocksize, throttle, &report).await {
        Ok((pos, ack)) => report.send(DccEventKind::Done { pos, ack }),
        Err(e) => report.send(DccEventKind::Failed(e)),
    }
}

/// Stream blocks and read acks at the same time. In slow mode the next
/// block waits until the ack catches up with what was sent.
#[allow(clippy::too_many_arguments)]
async fn send_loop(
    stream: TcpStream,
    file: std::fs::File,
    start: u64,
    size: u64,
    fast: bool,
    blocksize: usize,
    mut throttle: watch::Receiver<u8>,
    report: &Reporter,
) -> Result<(u64, u64), String> {
    let mut file = tokio::fs::File::from_std(file);
    let (mut rd, mut wr) = stream.into_split();
    let mut pos = start;
    let mut ack = start;
    let mut block = vec![0u8; blocksize];
    let mut pending: Vec<u8> = Vec::with_capacity(blocksize);
    let mut off = 0;
    let mut ackbuf = [0u8; 4];
    let mut fill = 0;

    loop {
        if pos >= size && ack >= size {
            return Ok((pos, ack));
        }
        let throttled = *throttle.borrow() != 0;
        if off == pending.len() && pos < size && !throttled && (fast || ack >= pos) {
            let want = (size - pos).min(blocksize as u64) as usize;
            let n = file.read(&mut block[..want]).await.map_err(|e| e.to_string())?;
            if n == 0 {
                return Err(String::from("file shrank while sending"));
            }
            pending.clear();
            pending.extend_from_slice(&block[..n]);
            off = 0;
        }
        let can_write = off < pending.len();

        tokio::select! {
            read = rd.read(&mut ackbuf[fill..]) => {
                let n = read.map_err(|e| e.to_string())?;
                if n == 0 {
                    return if pos >= size {
                        Ok((pos, ack))
                    } else {
                        Err(String::from("connection closed"))
                    };
                }
                fill += n;
                if fill == ackbuf.len() {
                    fill = 0;
                    ack = combine_ack(pos, u32::from_be_bytes(ackbuf));
                    report.send(DccEventKind::Progress { pos, ack });
                }
            }
            written = wr.write(&pending[off..]), if can_write => {
                let n = written.map_err(|e| e.to_string())?;
                if n == 0 {
                    return Err(String::from("connection closed"));
                }
                off += n;
                pos += n as u64;
                report.send(DccEventKind::Progress { pos, ack });
            }
            changed = throttle.changed(), if throttled => {
                if changed.is_err() {
                    return Err(String::from("aborted"));
                }
            }
        }
    }
}

/// Line-oriented chat until either side hangs up.
async fn chat(stream: TcpStream, mut lines: mpsc::UnboundedReceiver<String>, report: Reporter) {
    let mut framed = Framed::new(stream, LineCodec::new());
    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(line)) => {
                    report.send(DccEventKind::ChatLine(decode_line(&line.bytes, UTF_8)));
                }
                Some(Err(e)) => return report.send(DccEventKind::Failed(e.to_string())),
                None => return report.send(DccEventKind::Failed(String::from("connection closed"))),
            },
            line = lines.recv() => match line {
                Some(text) => {
                    if let Err(e) = framed.send(text).await {
                        return report.send(DccEventKind::Failed(e.to_string()));
                    }
                }
                None => return,
            },
        }
    }
}
