//! Connection lifecycle verbs: PASS, NICK, USER, QUIT, PING, PONG, and
//! the registration completion path.

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
use murmur_proto::mode::{CHANNEL_MODES, USER_MODES};
use murmur_proto::{irc_to_lower, Message, Numeric};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::helpers::{broadcast, channels_of, teardown_client};
use super::{need_more_params, server_query, Context, Handler};
use crate::error::HandlerResult;
use crate::server::Server;
use crate::state::Client;

pub struct Pass;

#[async_trait]
impl Handler for Pass {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        if ctx.client.is_registered().await {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_ALREADYREGISTRED,
                    &[],
                    Some("You may not reregister"),
                )
                .await;
            return Ok(());
        }
        if params.len() != 1 {
            return Err(need_more_params("PASS"));
        }

        ctx.client.state.write().await.pass_attempt = Some(params[0].clone());
        Ok(())
    }
}

pub struct Nick;

#[async_trait]
impl Handler for Nick {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(nick) = params.first() else {
            return Err(crate::error::HandlerError::NoNicknameGiven);
        };

        if ctx.server.registry.nick_in_use(nick) {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NICKNAMEINUSE,
                    &[nick.as_str()],
                    Some("Nickname is already in use"),
                )
                .await;
            return Ok(());
        }

        let registered = ctx.client.is_registered().await;
        if !registered {
            ctx.client.state.write().await.nick = nick.clone();
            try_complete_registration(ctx.server, ctx.client).await;
            return Ok(());
        }

        rename(ctx.server, ctx.client, nick).await;
        Ok(())
    }
}

/// Rename a registered client: claim the new nick, rewrite every
/// membership entry, then release the old key. Claiming through the
/// registry entry keeps two concurrent renames to the same nick from
/// both succeeding.
async fn rename(server: &Arc<Server>, client: &Arc<Client>, new_nick: &str) {
    if !server.registry.claim_nick(new_nick, client.clone()) {
        server
            .reply(
                client,
                Numeric::ERR_NICKNAMEINUSE,
                &[new_nick],
                Some("Nickname is already in use"),
            )
            .await;
        return;
    }

    let old_prefix = client.prefix().await;
    let old_nick = old_prefix.nick.clone();
    let old_folded = irc_to_lower(&old_nick);
    let new_folded = irc_to_lower(new_nick);

    let notice = Message::new("NICK", vec![new_nick.to_string()])
        .with_source(old_prefix)
        .with_trailing();
    client.send(notice.clone()).await;

    for (_, channel) in channels_of(server, client).await {
        {
            let mut guard = channel.write().await;
            if let Some(mut member) = guard.members.remove(&old_folded) {
                member.nick = new_nick.to_string();
                guard.members.insert(new_folded.clone(), member);
            }
        }
        broadcast(server, &channel, &notice, Some(&new_folded), None).await;
    }

    server.registry.release_nick(&old_nick, client);
    client.state.write().await.nick = new_nick.to_string();
    debug!(old = %old_nick, new = %new_nick, "nick changed");
}

pub struct User;

#[async_trait]
impl Handler for User {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        if ctx.client.is_registered().await {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_ALREADYREGISTRED,
                    &[],
                    Some("You may not reregister"),
                )
                .await;
            return Ok(());
        }
        if params.len() != 4 {
            return Err(need_more_params("USER"));
        }

        {
            let mut state = ctx.client.state.write().await;
            // numeric mode parameter may request +i (8) and +w (4) only
            if let Ok(bits) = params[1].parse::<u32>() {
                state.modes.invisible = bits & 8 != 0;
                state.modes.wallops = bits & 4 != 0;
            }
            state.user = params[0].clone();
            state.realname = params[3].clone();
        }

        try_complete_registration(ctx.server, ctx.client).await;
        Ok(())
    }
}

pub struct Quit;

#[async_trait]
impl Handler for Quit {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let reason = params.first().cloned().unwrap_or_default();
        let nick = ctx.client.id().await;

        teardown_client(ctx.server, ctx.client, &reason).await;
        ctx.server
            .send_error(ctx.client, &format!("{nick} quit"))
            .await;
        ctx.client.cancel.cancel();
        Ok(())
    }
}

pub struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let mut reply = Message::new("PONG", vec![ctx.server.name().to_string()]);
        if let Some(token) = params.first() {
            reply.params.push(token.clone());
            reply.trailing = true;
        }
        ctx.server.send_from_server(ctx.client, reply).await;
        Ok(())
    }
}

pub struct Pong;

#[async_trait]
impl Handler for Pong {
    async fn handle(&self, ctx: &Context<'_>, _params: &[String]) -> HandlerResult {
        ctx.client.state.write().await.awaiting_pong = false;
        Ok(())
    }
}

/// Complete registration once NICK and USER have both arrived and CAP
/// negotiation is not holding it open.
///
/// A bad server password sends ERR_PASSWDMISMATCH and an ERROR line,
/// then closes the link. Success claims the nick, emits the welcome
/// burst and starts the keepalive task.
pub(crate) async fn try_complete_registration(server: &Arc<Server>, client: &Arc<Client>) {
    let (nick, pass_attempt, sasl_pending) = {
        let state = client.state.read().await;
        if state.reg_suspended || state.nick.is_empty() || state.user.is_empty() {
            return;
        }
        (
            state.nick.clone(),
            state.pass_attempt.clone(),
            state.sasl.is_some() && !state.authenticated,
        )
    };

    if let Some(required) = &server.config.password {
        let ok = PasswordHash::new(required)
            .map(|hash| {
                Argon2::default()
                    .verify_password(pass_attempt.unwrap_or_default().as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false);

        if !ok {
            server
                .reply(
                    client,
                    Numeric::ERR_PASSWDMISMATCH,
                    &[],
                    Some("Password incorrect"),
                )
                .await;
            server
                .send_error(
                    client,
                    &format!("Closing Link: {} (Bad Password)", server.name()),
                )
                .await;
            teardown_client(server, client, "Bad Password").await;
            client.cancel.cancel();
            return;
        }
    }

    // an unfinished SASL exchange is abandoned at registration
    if sasl_pending {
        client.state.write().await.sasl = None;
        server
            .reply(
                client,
                Numeric::ERR_SASLABORTED,
                &[],
                Some("SASL authentication aborted"),
            )
            .await;
    }

    if !server.registry.claim_nick(&nick, client.clone()) {
        let mut state = client.state.write().await;
        state.nick.clear();
        drop(state);
        server
            .reply(
                client,
                Numeric::ERR_NICKNAMEINUSE,
                &[nick.as_str()],
                Some("Nickname is already in use"),
            )
            .await;
        return;
    }

    client.state.write().await.modes.registered = true;
    server.registry.unknowns.fetch_sub(1, Ordering::Relaxed);
    info!(nick = %nick, host = %client.host, "client registered");

    let prefix = client.prefix().await.to_string();
    server
        .reply(
            client,
            Numeric::RPL_WELCOME,
            &[],
            Some(&format!(
                "Welcome to the {} Network, {}",
                server.config.server.network, prefix
            )),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_YOURHOST,
            &[],
            Some(&format!(
                "Your host is {}, running version murmurd-{}",
                server.name(),
                env!("CARGO_PKG_VERSION")
            )),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_CREATED,
            &[],
            Some(&format!(
                "This server was created {}",
                server.created.format("%Y-%m-%d %H:%M:%S UTC")
            )),
        )
        .await;
    server
        .reply(
            client,
            Numeric::RPL_MYINFO,
            &[
                server.name(),
                env!("CARGO_PKG_VERSION"),
                USER_MODES,
                CHANNEL_MODES,
            ],
            None,
        )
        .await;
    for token_line in isupport_lines(server) {
        let args: Vec<&str> = token_line.iter().map(|s| s.as_str()).collect();
        server
            .reply(
                client,
                Numeric::RPL_ISUPPORT,
                &args,
                Some("are supported by this server"),
            )
            .await;
    }

    server_query::send_lusers(server, client).await;
    server_query::send_motd(server, client).await;

    spawn_keepalive(server.clone(), client.clone());
}

/// ISUPPORT tokens, chunked well under the line limit.
fn isupport_lines(server: &Arc<Server>) -> Vec<Vec<String>> {
    vec![vec![
        "CASEMAPPING=rfc1459".to_string(),
        "CHANTYPES=#&".to_string(),
        "CHANMODES=beI,k,l,imstn".to_string(),
        "PREFIX=(qaohv)~&@%+".to_string(),
        format!("NETWORK={}", server.config.server.network),
    ]]
}

/// Periodic server PING with a PONG deadline. Every `ping_interval`
/// seconds the client is pinged; no PONG within `pong_grace` seconds
/// closes the link.
pub fn spawn_keepalive(server: Arc<Server>, client: Arc<Client>) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(server.config.timeouts.ping_interval);
        let grace = Duration::from_secs(server.config.timeouts.pong_grace);

        loop {
            tokio::select! {
                _ = client.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let nick = client.id().await;
            client.state.write().await.awaiting_pong = true;
            server
                .send_from_server(&client, Message::new("PING", vec![nick.clone()]))
                .await;

            tokio::select! {
                _ = client.cancel.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }

            if client.state.read().await.awaiting_pong {
                info!(nick = %nick, "PING timeout, closing link");
                server
                    .send_error(&client, "Closing Link: PING/PONG timeout")
                    .await;
                teardown_client(&server, &client, "PING/PONG timeout").await;
                client.cancel.cancel();
                return;
            }
        }
    });
}
