//! Address and socket helpers.
//!
//! Name resolution, proxy traversal, TLS client setup and the identd
//! responder. Everything here is usable from both server connections and
//! DCC transfers.

mod identd;
mod proxy;
mod resolve;
mod tls;

pub use identd::{Identd, ident_reply};
pub use proxy::{
    ProxyConfig, ProxyTarget, ProxyType, ProxyUse, connect_via, handshake, http_connect,
    socks4, socks5, wingate,
};
pub use resolve::{DnsCache, Resolver};
pub use tls::{TlsOptions, connector, tls_handshake};

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};

/// Plain TCP connect with an optional local bind address and a timeout.
pub async fn tcp_connect(
    addr: SocketAddr,
    bind: Option<IpAddr>,
    timeout: Duration,
) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(ip) = bind.filter(|ip| ip.is_ipv4() == addr.is_ipv4()) {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    match tokio::time::timeout(timeout, socket.connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connection timed out",
        )),
    }
}
