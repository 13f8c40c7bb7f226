//! Ident (RFC 1413) responder.
//!
//! Server connections register their local port with the user name to
//! report. The listener runs as its own task and only touches the shared
//! port map.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Longest query line we answer.
const MAX_QUERY: usize = 64;

#[derive(Default)]
pub struct Identd {
    users: Arc<DashMap<u16, String>>,
    task: Option<AbortHandle>,
}

impl Identd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries for `local_port` with `user`.
    pub fn register(&self, local_port: u16, user: &str) {
        self.users.insert(local_port, user.to_owned());
    }

    pub fn unregister(&self, local_port: u16) {
        self.users.remove(&local_port);
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Bind `addr` and answer queries until [`Identd::stop`]. Returns the
    /// bound address.
    pub async fn start(&mut self, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        self.stop();
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "identd listening");

        let users = Arc::clone(&self.users);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let users = Arc::clone(&users);
                        tokio::spawn(async move {
                            if let Err(e) = answer(stream, &users).await {
                                debug!(%peer, error = %e, "ident query failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "identd accept failed");
                        break;
                    }
                }
            }
        });
        self.task = Some(task.abort_handle());
        Ok(local)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Identd {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn answer(stream: TcpStream, users: &DashMap<u16, String>) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read).take(MAX_QUERY as u64);
    let mut query = String::new();
    reader.read_line(&mut query).await?;
    let reply = ident_reply(&query, users);
    write.write_all(reply.as_bytes()).await?;
    write.shutdown().await
}

/// Reply line for a `local , remote` query.
pub fn ident_reply(query: &str, users: &DashMap<u16, String>) -> String {
    let ports = query.trim().split_once(',').and_then(|(local, remote)| {
        Some((
            local.trim().parse::<u16>().ok()?,
            remote.trim().parse::<u16>().ok()?,
        ))
    });
    match ports {
        Some((local, remote)) => match users.get(&local) {
            Some(user) => format!("{}, {} : USERID : UNIX : {}\r\n", local, remote, *user),
            None => format!("{}, {} : ERROR : NO-USER\r\n", local, remote),
        },
        None => "0, 0 : ERROR : INVALID-PORT\r\n".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_lines() {
        let users = DashMap::new();
        users.insert(50000, "alice".to_owned());
        assert_eq!(
            ident_reply("50000 , 6667\r\n", &users),
            "50000, 6667 : USERID : UNIX : alice\r\n"
        );
        assert_eq!(
            ident_reply("50001,6667", &users),
            "50001, 6667 : ERROR : NO-USER\r\n"
        );
        assert_eq!(ident_reply("junk", &users), "0, 0 : ERROR : INVALID-PORT\r\n");
    }

    #[tokio::test]
    async fn test_listener_answers() {
        let mut identd = Identd::new();
        identd.register(40000, "bob");
        let addr = identd.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"40000, 113\r\n").await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "40000, 113 : USERID : UNIX : bob\r\n");

        identd.stop();
        assert!(!identd.is_running());
    }
}
