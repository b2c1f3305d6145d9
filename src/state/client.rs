//! Per-connection client state.
//!
//! A [`Client`] owns the connection-scoped handles (outbound queue,
//! cancellation token, flood bucket, read-size limit) plus a lock over
//! the mutable protocol state. Messages are sent by queueing onto the
//! per-client writer task, which serializes writes and applies the
//! `server-time` tag.

use murmur_proto::{irc_to_lower, Cap, Message, ModeChange, Source};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::sasl::Mechanism;

/// Read limit before `message-tags` is negotiated.
pub const BASE_READ_LIMIT: usize = 512;

/// Read limit once `message-tags` is negotiated (512 + 8,192 tag bytes).
pub const TAGGED_READ_LIMIT: usize = 512 + 8_192;

/// Flood-bucket capacity.
pub const MAX_GRANTS: usize = 10;

/// User modes.
#[derive(Debug, Default, Clone)]
pub struct UserModes {
    pub invisible: bool,  // +i
    pub oper: bool,       // +o
    pub wallops: bool,    // +w
    pub away: bool,       // set/cleared by AWAY
    pub registered: bool, // completed registration
}

impl UserModes {
    /// Render as a `+...` mode string for RPL_UMODEIS.
    pub fn to_mode_string(&self) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.oper {
            s.push('o');
        }
        if self.wallops {
            s.push('w');
        }
        s
    }

    /// Apply one parsed user-mode change. Returns `false` for letters the
    /// server does not recognize.
    ///
    /// `o` cannot be set this way (operator status comes from OPER), only
    /// removed by the user themselves; `O` and `r` are accepted and
    /// ignored, as the original server treats them.
    pub fn apply(&mut self, change: &ModeChange) -> bool {
        match change.mode {
            'i' => self.invisible = change.add,
            'w' => self.wallops = change.add,
            'o' => {
                if !change.add {
                    self.oper = false;
                }
            }
            'O' | 'r' => {}
            _ => return false,
        }
        true
    }
}

/// Mutable protocol state, guarded by the client's lock.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Nickname; empty until NICK. `*` is rendered in replies when unset.
    pub nick: String,
    pub user: String,
    pub realname: String,
    pub modes: UserModes,
    pub away: Option<String>,

    /// PASS argument, checked at registration.
    pub pass_attempt: Option<String>,
    /// CAP LS/REQ was seen; registration blocks until CAP END.
    pub reg_suspended: bool,

    /// Negotiated capabilities.
    pub caps: HashSet<Cap>,
    /// Highest CAP version the client advertised (0 if none).
    pub cap_version: u32,

    /// SASL exchange in progress, if any.
    pub sasl: Option<Mechanism>,
    /// Buffered AUTHENTICATE continuation chunks (exact 400-byte lines).
    pub sasl_buf: String,
    /// SASL completed successfully.
    pub authenticated: bool,
    /// Account name from a successful SASL exchange.
    pub account: Option<String>,

    /// A server PING is outstanding.
    pub awaiting_pong: bool,
    /// Unix timestamp of the last successful command.
    pub last_activity: i64,

    /// Case-folded names of channels this client is in.
    pub channels: HashSet<String>,

    /// Connection teardown has already run.
    pub finished: bool,
}

/// One connected client.
#[derive(Debug)]
pub struct Client {
    pub addr: SocketAddr,
    /// rDNS name, or the literal IP when the lookup failed or timed out.
    pub host: String,
    /// Unix timestamp of connection establishment.
    pub joined_at: i64,
    /// Connected over TLS.
    pub secure: bool,
    /// SHA-256 fingerprint (hex) of the TLS client certificate, if any.
    pub certfp: Option<String>,

    /// Cancelling this token stops the reader, writer and keepalive
    /// tasks and removes the connection.
    pub cancel: CancellationToken,

    outbound: mpsc::Sender<Message>,
    grants: mpsc::Sender<()>,
    read_limit: Arc<AtomicUsize>,

    pub state: RwLock<ClientState>,
}

impl Client {
    /// Assemble a client around its connection handles.
    pub fn new(
        addr: SocketAddr,
        host: String,
        secure: bool,
        certfp: Option<String>,
        outbound: mpsc::Sender<Message>,
        grants: mpsc::Sender<()>,
        read_limit: Arc<AtomicUsize>,
        cancel: CancellationToken,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            addr,
            host,
            joined_at: now,
            secure,
            certfp,
            cancel,
            outbound,
            grants,
            read_limit,
            state: RwLock::new(ClientState {
                last_activity: now,
                ..ClientState::default()
            }),
        }
    }

    /// The nick used in replies: the real nick, or `*` before NICK.
    pub async fn id(&self) -> String {
        let state = self.state.read().await;
        if state.nick.is_empty() {
            "*".to_string()
        } else {
            state.nick.clone()
        }
    }

    /// The case-folded nick, for registry keys.
    pub async fn folded_nick(&self) -> String {
        irc_to_lower(&self.state.read().await.nick)
    }

    /// The `nick!user@host` source used when this client originates a
    /// message.
    pub async fn prefix(&self) -> Source {
        let state = self.state.read().await;
        Source::full(state.nick.clone(), state.user.clone(), self.host.clone())
    }

    /// `nick!user@host` as a plain string, for banmask matching.
    pub async fn hostmask(&self) -> String {
        let state = self.state.read().await;
        format!("{}!{}@{}", state.nick, state.user, self.host)
    }

    /// Queue a message for this client. Returns `false` when the
    /// connection is gone.
    pub async fn send(&self, msg: Message) -> bool {
        self.outbound.send(msg).await.is_ok()
    }

    /// Whether the client negotiated `cap`.
    pub async fn has_cap(&self, cap: Cap) -> bool {
        self.state.read().await.caps.contains(&cap)
    }

    /// Whether registration has completed.
    pub async fn is_registered(&self) -> bool {
        self.state.read().await.modes.registered
    }

    /// The reader's current maximum line length.
    pub fn read_limit(&self) -> usize {
        self.read_limit.load(Ordering::Acquire)
    }

    /// Resize the read limit (negotiating or dropping `message-tags`).
    /// The reader observes the new size on its next read.
    pub fn set_read_limit(&self, limit: usize) {
        self.read_limit.store(limit, Ordering::Release);
    }

    /// Return one flood grant to the bucket; a full bucket is unchanged.
    pub fn add_grant(&self) {
        let _ = self.grants.try_send(());
    }
}
