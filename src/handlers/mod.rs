//! Command handlers and the verb dispatcher.
//!
//! One handler per verb, registered in a map keyed by the upper-cased
//! command name. Handlers receive the shared [`Server`] context and the
//! issuing client, and communicate results by writing replies and
//! mutating registry state.

mod cap;
mod channel;
mod connection;
pub mod helpers;
mod messaging;
mod misc;
mod mode;
mod server_query;
mod user_query;

pub use helpers::teardown_client;

use async_trait::async_trait;
use murmur_proto::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{HandlerError, HandlerResult};
use crate::server::Server;
use crate::state::Client;

/// Context handed to every handler invocation.
pub struct Context<'a> {
    pub server: &'a Arc<Server>,
    pub client: &'a Arc<Client>,
}

/// A command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the verb with the message's parameters.
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult;
}

/// Verbs accepted before registration completes; everything else is
/// silently discarded until then.
const PRE_REGISTRATION: [&str; 6] = ["CAP", "NICK", "USER", "PASS", "AUTHENTICATE", "QUIT"];

/// The verb → handler table.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Dispatcher {
    /// Build the table with every supported verb.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

        // registration
        handlers.insert("PASS", Box::new(connection::Pass));
        handlers.insert("NICK", Box::new(connection::Nick));
        handlers.insert("USER", Box::new(connection::User));
        handlers.insert("QUIT", Box::new(connection::Quit));
        handlers.insert("CAP", Box::new(cap::CapCmd));
        handlers.insert("AUTHENTICATE", Box::new(cap::Authenticate));

        // channel operations
        handlers.insert("JOIN", Box::new(channel::Join));
        handlers.insert("PART", Box::new(channel::Part));
        handlers.insert("TOPIC", Box::new(channel::Topic));
        handlers.insert("NAMES", Box::new(channel::Names));
        handlers.insert("LIST", Box::new(channel::List));
        handlers.insert("INVITE", Box::new(channel::Invite));
        handlers.insert("KICK", Box::new(channel::Kick));

        // server queries
        handlers.insert("MOTD", Box::new(server_query::Motd));
        handlers.insert("LUSERS", Box::new(server_query::Lusers));
        handlers.insert("TIME", Box::new(server_query::Time));
        handlers.insert("MODE", Box::new(mode::Mode));

        // user queries
        handlers.insert("WHO", Box::new(user_query::Who));
        handlers.insert("WHOIS", Box::new(user_query::Whois));

        // communication
        handlers.insert("PRIVMSG", Box::new(messaging::Privmsg));
        handlers.insert("NOTICE", Box::new(messaging::Notice));

        // miscellaneous
        handlers.insert("PING", Box::new(connection::Ping));
        handlers.insert("PONG", Box::new(connection::Pong));
        handlers.insert("AWAY", Box::new(misc::Away));
        handlers.insert("SETNAME", Box::new(misc::Setname));
        handlers.insert("WALLOPS", Box::new(misc::Wallops));
        handlers.insert("OPER", Box::new(misc::Oper));
        handlers.insert("ERROR", Box::new(misc::ErrorCmd));

        Self { handlers }
    }

    /// Dispatch one message. Unknown verbs get ERR_UNKNOWNCOMMAND;
    /// pre-registration traffic is gated to the handshake verbs.
    pub async fn dispatch(&self, ctx: &Context<'_>, msg: &Message) {
        let verb = msg.command.to_uppercase();

        let registered = ctx.client.is_registered().await;
        if !registered && !PRE_REGISTRATION.contains(&verb.as_str()) {
            debug!(verb = %verb, "dropping command from unregistered client");
            return;
        }

        let Some(handler) = self.handlers.get(verb.as_str()) else {
            ctx.server
                .reply(
                    ctx.client,
                    murmur_proto::Numeric::ERR_UNKNOWNCOMMAND,
                    &[verb.as_str()],
                    Some("Unknown command"),
                )
                .await;
            return;
        };

        ctx.client.state.write().await.last_activity = chrono::Utc::now().timestamp();

        if let Err(e) = handler.handle(ctx, &msg.params).await {
            let nick = ctx.client.id().await;
            if let Some(reply) = e.to_reply(ctx.server.name(), &nick) {
                ctx.client.send(reply).await;
            } else {
                debug!(verb = %verb, error = %e, "handler error without reply");
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// `Err(NeedMoreParams)` shorthand used throughout the handlers.
pub(crate) fn need_more_params(command: &str) -> HandlerError {
    HandlerError::NeedMoreParams(command.to_string())
}
