//! The server context: configuration, registries, credential store and
//! the command dispatcher, passed to every handler.

use chrono::{DateTime, Utc};
use murmur_proto::{Message, Numeric, Source};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Db;
use crate::handlers::{Context, Dispatcher};
use crate::state::{Client, Registry};

/// Shared server state. One per process, behind an `Arc`.
pub struct Server {
    pub registry: Registry,
    pub config: Config,
    pub db: Db,
    /// When this server started, shown in RPL_CREATED.
    pub created: DateTime<Utc>,
    dispatcher: Dispatcher,
    /// Root shutdown signal; cancelling it stops the listeners and every
    /// connection.
    pub shutdown: CancellationToken,
}

impl Server {
    /// Build the server context.
    pub fn new(config: Config, db: Db) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            config,
            db,
            created: Utc::now(),
            dispatcher: Dispatcher::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// This server's name, the source of every numeric.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Send a numeric reply to `client`. `args` are the middle
    /// parameters after the client's nick; `text` becomes the trailing
    /// parameter when present.
    pub async fn reply(&self, client: &Client, num: Numeric, args: &[&str], text: Option<&str>) {
        let mut params = vec![client.id().await];
        params.extend(args.iter().map(|s| s.to_string()));

        let mut msg = Message::new(num.code(), params);
        if let Some(text) = text {
            msg.params.push(text.to_string());
            msg.trailing = true;
        }
        client
            .send(msg.with_source(Source::server(self.name())))
            .await;
    }

    /// Send an `ERROR :<reason>` line, the prelude to closing a link.
    pub async fn send_error(&self, client: &Client, reason: &str) {
        client
            .send(Message::new("ERROR", vec![reason.to_string()]).with_trailing())
            .await;
    }

    /// Send a message sourced from this server (non-numeric).
    pub async fn send_from_server(&self, client: &Client, msg: Message) {
        client.send(msg.with_source(Source::server(self.name()))).await;
    }

    /// Route one parsed message through the command dispatcher.
    pub async fn dispatch(self: &Arc<Self>, client: &Arc<Client>, msg: Message) {
        let ctx = Context {
            server: self,
            client,
        };
        self.dispatcher.dispatch(&ctx, &msg).await;
    }
}
