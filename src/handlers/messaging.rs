//! PRIVMSG and NOTICE.
//!
//! Both verbs share one router; NOTICE suppresses every error reply the
//! router would otherwise send.

use async_trait::async_trait;
use murmur_proto::{irc_to_lower, Cap, Message, Numeric};

use super::helpers::broadcast;
use super::{Context, Handler};
use crate::error::HandlerResult;
use crate::state::is_channel_name;

pub struct Privmsg;

#[async_trait]
impl Handler for Privmsg {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        communicate(ctx, params, false).await;
        Ok(())
    }
}

pub struct Notice;

#[async_trait]
impl Handler for Notice {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        communicate(ctx, params, true).await;
        Ok(())
    }
}

async fn communicate(ctx: &Context<'_>, params: &[String], notice: bool) {
    if params.len() < 2 {
        if !notice {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NOTEXTTOSEND,
                    &[],
                    Some("No text to send"),
                )
                .await;
        }
        return;
    }

    let verb = if notice { "NOTICE" } else { "PRIVMSG" };
    let text = &params[1];

    for target in params[0].split(',') {
        if is_channel_name(target) {
            send_to_channel(ctx, verb, target, text, notice).await;
        } else {
            send_to_nick(ctx, verb, target, text, notice).await;
        }
    }
}

async fn send_to_channel(ctx: &Context<'_>, verb: &str, target: &str, text: &str, notice: bool) {
    let Some(channel) = ctx.server.registry.get_channel(target) else {
        if !notice {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NOSUCHCHANNEL,
                    &[target],
                    Some("No such channel"),
                )
                .await;
        }
        return;
    };

    let nick = ctx.client.id().await;
    let (display_name, blocked) = {
        let guard = channel.read().await;
        let member = guard.member(&nick);
        let blocked = match member {
            // members need a prefix to speak under +m
            Some(m) => guard.modes.moderated && m.prefix.is_empty(),
            // outsiders are stopped by +n only
            None => guard.modes.no_external,
        };
        (guard.name.clone(), blocked)
    };

    if blocked {
        if !notice {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_CANNOTSENDTOCHAN,
                    &[display_name.as_str()],
                    Some("Cannot send to channel"),
                )
                .await;
        }
        return;
    }

    let msg = Message::new(verb, vec![display_name, text.to_string()])
        .with_source(ctx.client.prefix().await)
        .with_trailing();

    let skip = irc_to_lower(&nick);
    broadcast(ctx.server, &channel, &msg, Some(&skip), None).await;

    if ctx.client.has_cap(Cap::EchoMessage).await {
        ctx.client.send(msg).await;
    }
}

async fn send_to_nick(ctx: &Context<'_>, verb: &str, target: &str, text: &str, notice: bool) {
    let Some(recipient) = ctx.server.registry.get_client(target) else {
        if !notice {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NOSUCHNICK,
                    &[target],
                    Some("No such nick/channel"),
                )
                .await;
        }
        return;
    };

    let msg = Message::new(verb, vec![target.to_string(), text.to_string()])
        .with_source(ctx.client.prefix().await)
        .with_trailing();
    recipient.send(msg.clone()).await;

    if !notice {
        let away = recipient.state.read().await.away.clone();
        if let Some(away_text) = away {
            ctx.server
                .reply(ctx.client, Numeric::RPL_AWAY, &[target], Some(&away_text))
                .await;
        }
    }

    if ctx.client.has_cap(Cap::EchoMessage).await {
        ctx.client.send(msg).await;
    }
}
