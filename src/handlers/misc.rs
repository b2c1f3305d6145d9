//! AWAY, SETNAME, WALLOPS, OPER and the ERROR no-op.

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
use murmur_proto::{irc_to_lower, Cap, Message, Numeric};

use super::helpers::{broadcast, channels_of};
use super::{need_more_params, Context, Handler};
use crate::error::HandlerResult;

pub struct Away;

#[async_trait]
impl Handler for Away {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let message = params.first().filter(|m| !m.is_empty()).cloned();

        {
            let mut state = ctx.client.state.write().await;
            state.away = message.clone();
            state.modes.away = message.is_some();
        }

        match &message {
            Some(_) => {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::RPL_NOWAWAY,
                        &[],
                        Some("You have been marked as being away"),
                    )
                    .await
            }
            None => {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::RPL_UNAWAY,
                        &[],
                        Some("You are no longer marked as being away"),
                    )
                    .await
            }
        }

        // away-notify subscribers in common channels hear about the change
        let away_msg = Message::new("AWAY", message.into_iter().collect())
            .with_source(ctx.client.prefix().await)
            .with_trailing();
        let skip = ctx.client.folded_nick().await;
        for (_, channel) in channels_of(ctx.server, ctx.client).await {
            broadcast(
                ctx.server,
                &channel,
                &away_msg,
                Some(&skip),
                Some(Cap::AwayNotify),
            )
            .await;
        }
        Ok(())
    }
}

pub struct Setname;

#[async_trait]
impl Handler for Setname {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(realname) = params.first() else {
            return Err(need_more_params("SETNAME"));
        };

        ctx.client.state.write().await.realname = realname.clone();

        let msg = Message::new("SETNAME", vec![realname.clone()])
            .with_source(ctx.client.prefix().await)
            .with_trailing();

        // confirm to the issuer, then fan out to setname subscribers
        ctx.client.send(msg.clone()).await;
        let skip = ctx.client.folded_nick().await;
        for (_, channel) in channels_of(ctx.server, ctx.client).await {
            broadcast(ctx.server, &channel, &msg, Some(&skip), Some(Cap::Setname)).await;
        }
        Ok(())
    }
}

pub struct Wallops;

#[async_trait]
impl Handler for Wallops {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(text) = params.first() else {
            return Err(need_more_params("WALLOPS"));
        };

        let msg = Message::new("WALLOPS", vec![text.clone()])
            .with_source(ctx.client.prefix().await)
            .with_trailing();

        for client in ctx.server.registry.clients() {
            if client.state.read().await.modes.wallops {
                client.send(msg.clone()).await;
            }
        }
        Ok(())
    }
}

pub struct Oper;

#[async_trait]
impl Handler for Oper {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        if params.len() != 2 {
            return Err(need_more_params("OPER"));
        }
        let (name, password) = (&params[0], &params[1]);

        let Some(block) = ctx
            .server
            .config
            .opers
            .iter()
            .find(|o| irc_to_lower(&o.name) == irc_to_lower(name))
        else {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NOOPERHOST,
                    &[],
                    Some("No O-lines for your host"),
                )
                .await;
            return Ok(());
        };

        let ok = PasswordHash::new(&block.password)
            .map(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false);

        if !ok {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_PASSWDMISMATCH,
                    &[],
                    Some("Password incorrect"),
                )
                .await;
            return Ok(());
        }

        ctx.client.state.write().await.modes.oper = true;

        let nick = ctx.client.id().await;
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_YOUREOPER,
                &[],
                Some("You are now an IRC operator"),
            )
            .await;
        ctx.server
            .send_from_server(
                ctx.client,
                Message::new("MODE", vec![nick, "+o".to_string()]),
            )
            .await;
        Ok(())
    }
}

/// Clients have no business sending ERROR; only another server would,
/// and there is no server linking.
pub struct ErrorCmd;

#[async_trait]
impl Handler for ErrorCmd {
    async fn handle(&self, _ctx: &Context<'_>, _params: &[String]) -> HandlerResult {
        Ok(())
    }
}
