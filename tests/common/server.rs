//! Scripted IRC server.
//!
//! Listens on an ephemeral loopback port; each accepted connection is a
//! [`TestConn`] a test reads client lines from and writes replies to.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub struct TestServer {
    listener: TcpListener,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener address")
    }

    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Accept the next client connection.
    pub async fn accept(&self) -> anyhow::Result<TestConn> {
        let (stream, _) = timeout(Duration::from_secs(10), self.listener.accept()).await??;
        Ok(TestConn::new(stream))
    }

    /// Accept a connection and never answer it.
    pub async fn accept_silent(&self) -> anyhow::Result<TcpStream> {
        let (stream, _) = timeout(Duration::from_secs(10), self.listener.accept()).await??;
        Ok(stream)
    }
}

/// One client connection, seen from the server side.
pub struct TestConn {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

#[allow(dead_code)]
impl TestConn {
    fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        }
    }

    /// Send a raw line.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line from the client, without its terminator.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(10), self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("client closed the connection");
        }
        Ok(line.trim_end().to_owned())
    }

    /// Receive lines until `predicate` matches; returns all of them.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Wait for the login lines, then welcome the client as `nick` and end
    /// the MOTD.
    pub async fn register(&mut self, nick: &str) -> anyhow::Result<Vec<String>> {
        let lines = self.recv_until(|l| l.starts_with("USER ")).await?;
        self.send_raw(&format!(":irc.test 001 {} :Welcome to the test network", nick))
            .await?;
        self.send_raw(&format!(":irc.test 005 {} CHANTYPES=# NETWORK=TestNet :are supported", nick))
            .await?;
        self.send_raw(&format!(":irc.test 376 {} :End of MOTD", nick)).await?;
        Ok(lines)
    }
}
