//! Per-connection plumbing: one reader task (this function), one writer
//! task, and a flood-bucket refill task.
//!
//! The reader frames lines up to the client's current read limit, spends
//! a flood grant per line, parses, and dispatches. The writer serializes
//! all outbound traffic for the connection and stamps `server-time` when
//! negotiated. Cancellation tears all three down and removes the client
//! from the registry.

use murmur_proto::{Cap, Message, ParseError};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::handlers::teardown_client;
use crate::server::Server;
use crate::state::{Client, BASE_READ_LIMIT, MAX_GRANTS};

/// rDNS gets this long before the literal IP is used instead.
const RDNS_TIMEOUT: Duration = Duration::from_millis(300);

/// Serve a plaintext connection.
pub async fn serve_plain(server: Arc<Server>, stream: TcpStream, addr: SocketAddr) {
    serve(server, stream, addr, false, None).await;
}

/// Complete the TLS handshake, capture any client certificate, and serve.
pub async fn serve_tls(
    server: Arc<Server>,
    acceptor: TlsAcceptor,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%addr, error = %e, "TLS handshake failed");
            return;
        }
    };

    let certfp = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| {
            let digest = Sha256::digest(cert.as_ref());
            digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
        });

    serve(server, stream, addr, true, certfp).await;
}

async fn serve<S>(
    server: Arc<Server>,
    stream: S,
    addr: SocketAddr,
    secure: bool,
    certfp: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let host = resolve_host(addr.ip()).await;
    info!(%addr, host = %host, secure, "connection accepted");

    let (out_tx, out_rx) = mpsc::channel::<Message>(64);
    let (grant_tx, mut grant_rx) = mpsc::channel::<()>(MAX_GRANTS);
    let read_limit = Arc::new(AtomicUsize::new(BASE_READ_LIMIT));
    let cancel = server.shutdown.child_token();

    let client = Arc::new(Client::new(
        addr,
        host,
        secure,
        certfp,
        out_tx,
        grant_tx,
        read_limit.clone(),
        cancel.clone(),
    ));
    for _ in 0..MAX_GRANTS {
        client.add_grant();
    }
    server.registry.unknowns.fetch_add(1, Ordering::Relaxed);

    let (read_half, write_half) = tokio::io::split(stream);
    let writer = tokio::spawn(write_loop(client.clone(), write_half, out_rx));
    spawn_grant_refill(&server, &client);

    let mut reader = BufReader::new(read_half);
    loop {
        let limit = client.read_limit();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = read_line_bounded(&mut reader, limit) => outcome,
        };

        match outcome {
            Ok(ReadLine::Line(line)) => {
                // flood control: each line spends a grant
                if grant_rx.try_recv().is_err() {
                    warn!(%addr, "flood bucket empty, closing");
                    server
                        .send_error(&client, "Closing Link: flooding the server")
                        .await;
                    break;
                }

                match Message::parse(&line) {
                    Ok(msg) => server.dispatch(&client, msg).await,
                    Err(ParseError::MsgSizeOverflow) => {
                        server
                            .send_error(&client, "Closing Link: message too large")
                            .await;
                        break;
                    }
                    // malformed lines are dropped without a reply
                    Err(ParseError::Parse(reason)) => {
                        debug!(%addr, reason, "dropping unparseable line");
                    }
                }
            }
            Ok(ReadLine::TooLong) => {
                server
                    .send_error(&client, "Closing Link: message too large")
                    .await;
                break;
            }
            Ok(ReadLine::Eof) => break,
            Err(e) => {
                debug!(%addr, error = %e, "read error");
                break;
            }
        }
    }

    teardown_client(&server, &client, "connection closed").await;
    cancel.cancel();
    let _ = writer.await;
    info!(%addr, "connection closed");
}

enum ReadLine {
    Line(Vec<u8>),
    Eof,
    TooLong,
}

/// Read one LF-terminated line of at most `limit` bytes.
async fn read_line_bounded<R>(reader: &mut BufReader<R>, limit: usize) -> std::io::Result<ReadLine>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(limit.min(512));
    loop {
        if line.len() == limit {
            return Ok(ReadLine::TooLong);
        }
        match reader.read_u8().await {
            Ok(b) => {
                line.push(b);
                if b == b'\n' {
                    return Ok(ReadLine::Line(line));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(ReadLine::Eof);
            }
            Err(e) => return Err(e),
        }
    }
}

/// The writer task: drains the outbound queue, one line per message,
/// CRLF-terminated, with the `@time=` tag for `server-time` clients.
/// On cancellation the queue is drained, flushed, and the task exits.
async fn write_loop<W>(
    client: Arc<Client>,
    mut writer: WriteHalf<W>,
    mut rx: mpsc::Receiver<Message>,
) where
    W: AsyncWrite + Send,
{
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if write_message(&client, &mut writer, &msg).await.is_err() {
                    client.cancel.cancel();
                    break;
                }
            }
            _ = client.cancel.cancelled() => {
                // flush whatever was queued before the cancellation
                while let Ok(msg) = rx.try_recv() {
                    if write_message(&client, &mut writer, &msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}

async fn write_message<W>(
    client: &Client,
    writer: &mut WriteHalf<W>,
    msg: &Message,
) -> std::io::Result<()>
where
    W: AsyncWrite + Send,
{
    let mut line = String::new();
    if client.has_cap(Cap::ServerTime).await {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        line.push_str(&format!("@time={stamp} "));
    }
    line.push_str(&msg.to_string());
    line.push_str("\r\n");

    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Periodically return grants to the flood bucket; the channel caps it
/// at [`MAX_GRANTS`].
fn spawn_grant_refill(server: &Arc<Server>, client: &Arc<Client>) {
    let client = client.clone();
    let period = Duration::from_secs(server.config.timeouts.flood_refill.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                _ = client.cancel.cancelled() => return,
                _ = ticker.tick() => client.add_grant(),
            }
        }
    });
}

/// Reverse-resolve the peer address, falling back to the literal IP when
/// the lookup fails or exceeds [`RDNS_TIMEOUT`].
async fn resolve_host(ip: IpAddr) -> String {
    let resolver = hickory_resolver::TokioAsyncResolver::tokio(
        hickory_resolver::config::ResolverConfig::default(),
        hickory_resolver::config::ResolverOpts::default(),
    );

    match tokio::time::timeout(RDNS_TIMEOUT, resolver.reverse_lookup(ip)).await {
        Ok(Ok(names)) => names
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .unwrap_or_else(|| ip.to_string()),
        _ => ip.to_string(),
    }
}
