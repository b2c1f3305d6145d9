//! Line-oriented IRC test client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A raw-line IRC client for driving the server in tests.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Send one line; CRLF is appended.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write line");
        self.writer.flush().await.expect("flush");
    }

    /// Receive one line (CRLF stripped). `None` on EOF or timeout.
    pub async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => None,
            Ok(Ok(_)) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Read lines until one satisfies `pred`; panics when the stream
    /// ends first.
    pub async fn recv_until(&mut self, what: &str, pred: impl Fn(&str) -> bool) -> String {
        while let Some(line) = self.recv().await {
            if pred(&line) {
                return line;
            }
        }
        panic!("connection ended while waiting for {what}");
    }

    /// Read until a line containing `needle` arrives.
    pub async fn recv_containing(&mut self, needle: &str) -> String {
        self.recv_until(needle, |l| l.contains(needle)).await
    }

    /// Drain until the given numeric arrives.
    pub async fn recv_numeric(&mut self, code: &str) -> String {
        let want = format!(" {code} ");
        self.recv_until(code, |l| l.contains(&want)).await
    }

    /// Whether a line arrives within `wait`; used to assert silence or
    /// disconnection.
    pub async fn next_line_within(&mut self, wait: Duration) -> Option<String> {
        let mut line = String::new();
        match timeout(wait, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => None,
            Ok(Ok(_)) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// NICK + USER and wait for the welcome numeric.
    pub async fn register(&mut self, nick: &str) {
        self.send(&format!("NICK {nick}")).await;
        self.send(&format!("USER {nick} 0 * :{nick}")).await;
        self.recv_numeric("001").await;
        // drain the rest of the burst up to the MOTD end
        self.recv_numeric("376").await;
    }

    /// Register and join a channel, draining the join burst.
    pub async fn register_and_join(&mut self, nick: &str, channel: &str) {
        self.register(nick).await;
        self.send(&format!("JOIN {channel}")).await;
        self.recv_numeric("366").await;
    }
}
