//! Proxy traversal: SOCKS4, SOCKS5, HTTP CONNECT and Wingate.
//!
//! Each proxy type is one linear handshake over an already connected
//! stream. [`connect_via`] opens the proxy connection and runs the
//! handshake under a timeout.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::resolve::{DnsCache, Resolver};
use crate::error::ProxyError;
use crate::prefs::Prefs;

/// Longest status or header line accepted from an HTTP proxy or Wingate.
const MAX_PROXY_LINE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyType {
    Wingate,
    Socks4,
    Socks5,
    Http,
}

impl ProxyType {
    /// `net_proxy_type`: 0 disabled, 1 Wingate, 2 SOCKS4, 3 SOCKS5, 4 HTTP.
    pub fn from_pref(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Wingate),
            2 => Some(Self::Socks4),
            3 => Some(Self::Socks5),
            4 => Some(Self::Http),
            _ => None,
        }
    }
}

/// Which connections go through the proxy (`net_proxy_use`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyUse {
    All,
    IrcOnly,
    DccOnly,
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub kind: ProxyType,
    pub host: String,
    pub port: u16,
    pub auth: Option<(String, String)>,
    pub scope: ProxyUse,
    /// Sent as the SOCKS4 user id.
    pub user_name: String,
}

impl ProxyConfig {
    /// Proxy settings, or `None` when no proxy is configured.
    pub fn from_prefs(prefs: &Prefs) -> Option<Self> {
        let kind = ProxyType::from_pref(prefs.get_int("net_proxy_type"))?;
        let host = prefs.get_str("net_proxy_host");
        if host.is_empty() {
            return None;
        }
        let port = u16::try_from(prefs.get_int("net_proxy_port")).ok()?;
        let auth = prefs.get_bool("net_proxy_auth").then(|| {
            (
                prefs.get_str("net_proxy_user").to_owned(),
                prefs.get_str("net_proxy_pass").to_owned(),
            )
        });
        let scope = match prefs.get_int("net_proxy_use") {
            1 => ProxyUse::IrcOnly,
            2 => ProxyUse::DccOnly,
            _ => ProxyUse::All,
        };
        Some(Self {
            kind,
            host: host.to_owned(),
            port,
            auth,
            scope,
            user_name: prefs.get_str("irc_user_name").to_owned(),
        })
    }

    pub fn applies_to_irc(&self) -> bool {
        self.scope != ProxyUse::DccOnly
    }

    pub fn applies_to_dcc(&self) -> bool {
        self.scope != ProxyUse::IrcOnly
    }
}

/// Where the proxy should connect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyTarget {
    Ip(IpAddr),
    Domain(String),
}

impl ProxyTarget {
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Domain(host.to_owned()),
        }
    }

    fn host_string(&self) -> String {
        match self {
            Self::Ip(IpAddr::V6(ip)) => format!("[{}]", ip),
            Self::Ip(ip) => ip.to_string(),
            Self::Domain(name) => name.clone(),
        }
    }
}

/// Connect to the proxy and tunnel to `target:port`.
pub async fn connect_via(
    proxy: &ProxyConfig,
    resolver: &Resolver,
    cache: &DnsCache,
    target: &ProxyTarget,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, ProxyError> {
    let proxy_ip = resolver
        .lookup_cached(cache, &proxy.host)
        .await
        .ok_or_else(|| ProxyError::Resolve(proxy.host.clone()))?;
    let addr = SocketAddr::new(proxy_ip, proxy.port);
    debug!(proxy = %addr, kind = ?proxy.kind, "connecting through proxy");

    let result = tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(addr).await?;
        let target = match (proxy.kind, target) {
            // SOCKS4 cannot carry a hostname
            (ProxyType::Socks4, ProxyTarget::Domain(name)) => resolver
                .lookup(name)
                .await
                .map(ProxyTarget::Ip)
                .ok_or_else(|| ProxyError::Resolve(name.clone()))?,
            _ => target.clone(),
        };
        handshake(proxy, &mut stream, &target, port).await?;
        Ok::<_, ProxyError>(stream)
    })
    .await;

    match result {
        Ok(stream) => stream,
        Err(_) => Err(ProxyError::Timeout),
    }
}

/// Run the handshake for `proxy.kind` on an open stream.
pub async fn handshake<S>(
    proxy: &ProxyConfig,
    stream: &mut S,
    target: &ProxyTarget,
    port: u16,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let auth = proxy.auth.as_ref().map(|(u, p)| (u.as_str(), p.as_str()));
    match proxy.kind {
        ProxyType::Socks4 => match target {
            ProxyTarget::Ip(IpAddr::V4(ip)) => {
                socks4(stream, ip.octets(), port, &proxy.user_name).await
            }
            _ => Err(ProxyError::Socks4NeedsIpv4),
        },
        ProxyType::Socks5 => socks5(stream, target, port, auth).await,
        ProxyType::Http => http_connect(stream, target, port, auth).await,
        ProxyType::Wingate => wingate(stream, target, port).await,
    }
}

/// SOCKS4 CONNECT: version, command, port, address, then the user id
/// padded to ten bytes. The reply is eight bytes, `0x5A` meaning granted.
pub async fn socks4<S>(
    stream: &mut S,
    ip: [u8; 4],
    port: u16,
    user: &str,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = Vec::with_capacity(18);
    request.extend_from_slice(&[4, 1]);
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip);
    let mut user_id = [0u8; 10];
    let len = user.len().min(9);
    user_id[..len].copy_from_slice(&user.as_bytes()[..len]);
    request.extend_from_slice(&user_id);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x5A {
        return Err(ProxyError::Socks4Rejected(reply[1]));
    }
    Ok(())
}

/// SOCKS5 with optional RFC 1929 username/password authentication.
pub async fn socks5<S>(
    stream: &mut S,
    target: &ProxyTarget,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = if auth.is_some() { 2 } else { 0 };
    stream.write_all(&[5, 1, method]).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 5 || reply[1] != method {
        return Err(ProxyError::Socks5NoMethod);
    }

    if let Some((user, pass)) = auth {
        let user = &user.as_bytes()[..user.len().min(255)];
        let pass = &pass.as_bytes()[..pass.len().min(255)];
        let mut request = Vec::with_capacity(3 + user.len() + pass.len());
        request.push(1);
        request.push(user.len() as u8);
        request.extend_from_slice(user);
        request.push(pass.len() as u8);
        request.extend_from_slice(pass);
        stream.write_all(&request).await?;

        stream.read_exact(&mut reply).await?;
        if reply[1] != 0 {
            return Err(ProxyError::Socks5AuthFailed);
        }
    }

    let mut request = vec![5, 1, 0];
    match target {
        ProxyTarget::Ip(IpAddr::V4(ip)) => {
            request.push(1);
            request.extend_from_slice(&ip.octets());
        }
        ProxyTarget::Ip(IpAddr::V6(ip)) => {
            request.push(4);
            request.extend_from_slice(&ip.octets());
        }
        ProxyTarget::Domain(name) => {
            let name = &name.as_bytes()[..name.len().min(255)];
            request.push(3);
            request.push(name.len() as u8);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != 5 {
        return Err(ProxyError::BadReply);
    }
    if head[1] != 0 {
        return Err(ProxyError::Socks5Rejected(head[1]));
    }
    // Bound address, then the port.
    let skip = match head[3] {
        1 => 4 + 2,
        4 => 16 + 2,
        3 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0]) + 2
        }
        _ => return Err(ProxyError::BadReply),
    };
    let mut rest = vec![0u8; skip];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

/// HTTP CONNECT. Any 2xx status opens the tunnel.
pub async fn http_connect<S>(
    stream: &mut S,
    target: &ProxyTarget,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!(
        "CONNECT {}:{} HTTP/1.0\r\n",
        target.host_string(),
        port
    );
    if let Some((user, pass)) = auth {
        let token = BASE64.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let status = read_line(stream).await?;
    let code = status.split_whitespace().nth(1).unwrap_or_default();
    if !status.starts_with("HTTP/") || !code.starts_with('2') {
        return Err(ProxyError::HttpStatus(status));
    }
    // Headers up to the blank line.
    while !read_line(stream).await?.is_empty() {}
    Ok(())
}

/// Wingate: `host port`, then the gateway's banner line.
pub async fn wingate<S>(stream: &mut S, target: &ProxyTarget, port: u16) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("{} {}\r\n", target.host_string(), port);
    stream.write_all(request.as_bytes()).await?;
    let banner = read_line(stream).await?;
    debug!(banner = %banner, "wingate banner");
    Ok(())
}

/// Read one line byte by byte so nothing past it is consumed.
async fn read_line<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_PROXY_LINE {
            return Err(ProxyError::BadReply);
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
