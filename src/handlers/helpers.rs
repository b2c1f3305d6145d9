//! Shared helpers for handlers: channel broadcast, membership lookups,
//! and connection teardown.

use murmur_proto::{irc_to_lower, Cap, Message, Numeric};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::server::Server;
use crate::state::{Channel, Client};

/// Send `msg` to every member of `channel`.
///
/// `skip` is a case-folded nick excluded from the fan-out (usually the
/// sender). When `require_cap` is set, only members that negotiated the
/// capability receive the message. Membership is snapshotted under the
/// channel read lock, then sends happen lock-free; each recipient's own
/// queue keeps its stream ordered.
pub async fn broadcast(
    server: &Server,
    channel: &Arc<RwLock<Channel>>,
    msg: &Message,
    skip: Option<&str>,
    require_cap: Option<Cap>,
) {
    let members: Vec<String> = {
        let guard = channel.read().await;
        guard.members.keys().cloned().collect()
    };

    for nick in members {
        if skip == Some(nick.as_str()) {
            continue;
        }
        let Some(client) = server.registry.get_client(&nick) else {
            continue;
        };
        if let Some(cap) = require_cap {
            if !client.has_cap(cap).await {
                continue;
            }
        }
        client.send(msg.clone()).await;
    }
}

/// Resolve `name` to a channel the client belongs to, replying with
/// ERR_NOSUCHCHANNEL / ERR_NOTONCHANNEL otherwise.
pub async fn member_channel(
    server: &Server,
    client: &Client,
    name: &str,
) -> Option<Arc<RwLock<Channel>>> {
    let Some(channel) = server.registry.get_channel(name) else {
        server
            .reply(
                client,
                Numeric::ERR_NOSUCHCHANNEL,
                &[name],
                Some("No such channel"),
            )
            .await;
        return None;
    };

    let nick = client.id().await;
    if !channel.read().await.is_member(&nick) {
        server
            .reply(
                client,
                Numeric::ERR_NOTONCHANNEL,
                &[name],
                Some("You're not on that channel"),
            )
            .await;
        return None;
    }

    Some(channel)
}

/// The channels a client is in, snapshotted from its state.
pub async fn channels_of(
    server: &Server,
    client: &Client,
) -> Vec<(String, Arc<RwLock<Channel>>)> {
    let names: Vec<String> = client
        .state
        .read()
        .await
        .channels
        .iter()
        .cloned()
        .collect();

    names
        .into_iter()
        .filter_map(|name| server.registry.get_channel(&name).map(|ch| (name, ch)))
        .collect()
}

/// Remove a client from every structure it appears in and notify its
/// channels. Runs at most once per connection; later calls are no-ops.
///
/// The quitter itself does not receive the QUIT broadcast; channels left
/// empty are deleted.
pub async fn teardown_client(server: &Arc<Server>, client: &Arc<Client>, reason: &str) {
    let (nick, registered, channel_names) = {
        let mut state = client.state.write().await;
        if state.finished {
            return;
        }
        state.finished = true;
        (
            state.nick.clone(),
            state.modes.registered,
            state.channels.drain().collect::<Vec<_>>(),
        )
    };

    let folded = irc_to_lower(&nick);
    let quit_msg = Message::new("QUIT", vec![reason.to_string()])
        .with_source(client.prefix().await)
        .with_trailing();

    for name in channel_names {
        let Some(channel) = server.registry.get_channel(&name) else {
            continue;
        };

        let now_empty = {
            let mut guard = channel.write().await;
            guard.members.remove(&folded);
            guard.members.is_empty()
        };

        if now_empty {
            server.registry.remove_channel(&name);
        } else {
            broadcast(server, &channel, &quit_msg, Some(&folded), None).await;
        }
    }

    if registered {
        server.registry.release_nick(&nick, client);
    } else {
        server
            .registry
            .unknowns
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}
