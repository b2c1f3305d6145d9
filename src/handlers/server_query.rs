//! Server queries: MOTD, LUSERS, TIME.

use async_trait::async_trait;
use murmur_proto::Numeric;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{Context, Handler};
use crate::error::HandlerResult;
use crate::server::Server;
use crate::state::Client;

pub struct Motd;

#[async_trait]
impl Handler for Motd {
    async fn handle(&self, ctx: &Context<'_>, _params: &[String]) -> HandlerResult {
        send_motd(ctx.server, ctx.client).await;
        Ok(())
    }
}

pub(crate) async fn send_motd(server: &Arc<Server>, client: &Client) {
    server
        .reply(
            client,
            Numeric::RPL_MOTDSTART,
            &[],
            Some(&format!("- {} Message of the day - ", server.name())),
        )
        .await;
    for line in &server.config.server.motd {
        server
            .reply(client, Numeric::RPL_MOTD, &[], Some(&format!("- {line}")))
            .await;
    }
    server
        .reply(
            client,
            Numeric::RPL_ENDOFMOTD,
            &[],
            Some("End of /MOTD command"),
        )
        .await;
}

pub struct Lusers;

#[async_trait]
impl Handler for Lusers {
    async fn handle(&self, ctx: &Context<'_>, _params: &[String]) -> HandlerResult {
        send_lusers(ctx.server, ctx.client).await;
        Ok(())
    }
}

pub(crate) async fn send_lusers(server: &Arc<Server>, client: &Client) {
    let mut invisible = 0usize;
    let mut opers = 0usize;
    let clients = server.registry.clients();
    for other in &clients {
        let state = other.state.read().await;
        if state.modes.invisible {
            invisible += 1;
        }
        if state.modes.oper {
            opers += 1;
        }
    }

    let total = clients.len();
    let opers = opers.to_string();
    let unknowns = server.registry.unknowns.load(Ordering::Relaxed).to_string();
    let channels = server.registry.channel_count().to_string();

    server
        .reply(
            client,
            Numeric::RPL_LUSERCLIENT,
            &[],
            Some(&format!(
                "There are {total} users and {invisible} invisible on 1 servers"
            )),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_LUSEROP,
            &[opers.as_str()],
            Some("operator(s) online"),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_LUSERUNKNOWN,
            &[unknowns.as_str()],
            Some("unknown connection(s)"),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_LUSERCHANNELS,
            &[channels.as_str()],
            Some("channels formed"),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_LUSERME,
            &[],
            Some(&format!("I have {total} clients and 1 servers")),
        )
        .await;
}

pub struct Time;

#[async_trait]
impl Handler for Time {
    async fn handle(&self, ctx: &Context<'_>, _params: &[String]) -> HandlerResult {
        let now = chrono::Local::now().format("%A %B %e %Y -- %T %z").to_string();
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_TIME,
                &[ctx.server.name()],
                Some(&now),
            )
            .await;
        Ok(())
    }
}
