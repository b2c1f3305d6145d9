//! Process-wide registries of clients and channels.
//!
//! # Lock order
//!
//! 1. DashMap shard lock (during `get`/`iter`)
//! 2. Channel `RwLock`
//! 3. Client state `RwLock`
//!
//! Never the reverse: code holding a client write lock must not touch a
//! channel lock or iterate a map. Broadcast paths collect what they need
//! under one lock, release it, then send.

mod channel;
mod client;

pub use channel::{
    is_channel_name, ChanKind, Channel, ChannelModes, ListEntry, Member, PREFIX_ORDER,
};
pub use client::{Client, ClientState, UserModes, BASE_READ_LIMIT, MAX_GRANTS, TAGGED_READ_LIMIT};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_proto::irc_to_lower;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The shared client and channel tables. Keys are case-folded.
#[derive(Debug, Default)]
pub struct Registry {
    clients: DashMap<String, Arc<Client>>,
    channels: DashMap<String, Arc<RwLock<Channel>>>,
    /// Connections that have not completed registration.
    pub unknowns: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registered client by nick (any case).
    pub fn get_client(&self, nick: &str) -> Option<Arc<Client>> {
        self.clients.get(&irc_to_lower(nick)).map(|c| c.clone())
    }

    /// Whether a nick is taken.
    pub fn nick_in_use(&self, nick: &str) -> bool {
        self.clients.contains_key(&irc_to_lower(nick))
    }

    /// Claim `nick` for `client`. Fails (returns `false`) when the nick
    /// is already held, leaving the registry unchanged; checking and
    /// inserting happen under one map entry so concurrent claims of the
    /// same nick cannot both succeed.
    pub fn claim_nick(&self, nick: &str, client: Arc<Client>) -> bool {
        match self.clients.entry(irc_to_lower(nick)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(client);
                true
            }
        }
    }

    /// Release a nick if it is held by `client`.
    pub fn release_nick(&self, nick: &str, client: &Arc<Client>) -> bool {
        self.clients
            .remove_if(&irc_to_lower(nick), |_, held| Arc::ptr_eq(held, client))
            .is_some()
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Snapshot of all registered clients.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Look up a channel by name (any case).
    pub fn get_channel(&self, name: &str) -> Option<Arc<RwLock<Channel>>> {
        self.channels.get(&irc_to_lower(name)).map(|c| c.clone())
    }

    /// Fetch an existing channel or create it empty. The boolean is
    /// `true` when the channel was created by this call.
    pub fn get_or_create_channel(&self, name: &str) -> Option<(Arc<RwLock<Channel>>, bool)> {
        let folded = irc_to_lower(name);
        match self.channels.entry(folded) {
            Entry::Occupied(e) => Some((e.get().clone(), false)),
            Entry::Vacant(v) => {
                let channel = Arc::new(RwLock::new(Channel::new(name)?));
                v.insert(channel.clone());
                Some((channel, true))
            }
        }
    }

    /// Drop a channel from the table.
    pub fn remove_channel(&self, name: &str) {
        self.channels.remove(&irc_to_lower(name));
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Snapshot of all channels.
    pub fn channels(&self) -> Vec<Arc<RwLock<Channel>>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn test_client() -> Arc<Client> {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (grant_tx, _grant_rx) = mpsc::channel(MAX_GRANTS);
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        Arc::new(Client::new(
            addr,
            "localhost".to_string(),
            false,
            None,
            out_tx,
            grant_tx,
            Arc::new(AtomicUsize::new(BASE_READ_LIMIT)),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn nick_claims_are_exclusive_and_case_folded() {
        let registry = Registry::new();
        let a = test_client();
        let b = test_client();

        assert!(registry.claim_nick("Alice", a.clone()));
        assert!(!registry.claim_nick("ALICE", b.clone()));
        assert!(registry.nick_in_use("alice"));

        // releasing with the wrong client is a no-op
        assert!(!registry.release_nick("alice", &b));
        assert!(registry.release_nick("alice", &a));
        assert!(!registry.nick_in_use("alice"));
    }

    #[tokio::test]
    async fn concurrent_claims_never_both_succeed() {
        let registry = Arc::new(Registry::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let client = test_client();
            tasks.push(tokio::spawn(
                async move { registry.claim_nick("nick", client) },
            ));
        }

        let mut wins = 0;
        for t in tasks {
            if t.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn channel_create_is_idempotent() {
        let registry = Registry::new();

        let (first, created) = registry.get_or_create_channel("#Room").unwrap();
        assert!(created);
        let (second, created) = registry.get_or_create_channel("#room").unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.channel_count(), 1);

        assert!(registry.get_or_create_channel("bogus").is_none());

        registry.remove_channel("#ROOM");
        assert!(registry.get_channel("#room").is_none());
    }
}
