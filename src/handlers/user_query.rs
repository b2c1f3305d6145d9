//! User queries: WHO and WHOIS.

use async_trait::async_trait;
use chrono::Utc;
use murmur_proto::{irc_to_lower, wildcard_match, Numeric};
use std::sync::Arc;

use super::{Context, Handler};
use crate::error::HandlerResult;
use crate::state::Client;

pub struct Who;

#[async_trait]
impl Handler for Who {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let mask = params.first().map(String::as_str).unwrap_or("*");
        let only_ops = params.get(1).is_some_and(|p| p.as_str() == "o");

        // a bare WHO lists non-invisible clients outside the caller's
        // channels
        if mask == "*" || mask == "0" {
            for other in ctx.server.registry.clients() {
                let state = other.state.read().await;
                if state.modes.invisible {
                    continue;
                }
                drop(state);
                if shares_channel(ctx.client, &other).await {
                    continue;
                }
                who_line(ctx, "*", &other, None).await;
            }
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_ENDOFWHO,
                    &[mask],
                    Some("End of WHO list"),
                )
                .await;
            return Ok(());
        }

        // match channels first; the first matching channel wins
        for channel in ctx.server.registry.channels() {
            let (name, members) = {
                let guard = channel.read().await;
                (
                    guard.name.clone(),
                    guard
                        .members
                        .values()
                        .map(|m| (m.nick.clone(), m.prefix.clone()))
                        .collect::<Vec<_>>(),
                )
            };
            if !wildcard_match(mask, &irc_to_lower(&name)) {
                continue;
            }

            for (nick, prefix) in members {
                let Some(member_client) = ctx.server.registry.get_client(&nick) else {
                    continue;
                };
                if only_ops && !member_client.state.read().await.modes.oper {
                    continue;
                }
                who_line(ctx, &name, &member_client, Some(&prefix)).await;
            }
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_ENDOFWHO,
                    &[mask],
                    Some("End of WHO list"),
                )
                .await;
            return Ok(());
        }

        // no channel matched: treat the mask as a client mask
        for other in ctx.server.registry.clients() {
            let hostmask = other.hostmask().await;
            if !wildcard_match(mask, &irc_to_lower(&hostmask)) {
                continue;
            }
            if only_ops && !other.state.read().await.modes.oper {
                continue;
            }
            who_line(ctx, "*", &other, None).await;
        }
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_ENDOFWHO,
                &[mask],
                Some("End of WHO list"),
            )
            .await;
        Ok(())
    }
}

async fn shares_channel(a: &Arc<Client>, b: &Arc<Client>) -> bool {
    let a_channels = a.state.read().await.channels.clone();
    let b_state = b.state.read().await;
    a_channels.iter().any(|c| b_state.channels.contains(c))
}

/// One RPL_WHOREPLY line: channel, user, host, server, nick, flags,
/// hops + realname.
async fn who_line(ctx: &Context<'_>, channel: &str, target: &Arc<Client>, prefix: Option<&str>) {
    let state = target.state.read().await;
    let mut flags = if state.modes.away { "G" } else { "H" }.to_string();
    if state.modes.oper {
        flags.push('*');
    }
    if let Some(prefix) = prefix {
        if prefix.contains('@') {
            flags.push('@');
        } else if prefix.contains('+') {
            flags.push('+');
        }
    }

    let args = [
        channel,
        state.user.as_str(),
        target.host.as_str(),
        ctx.server.name(),
        state.nick.as_str(),
        flags.as_str(),
    ];
    let text = format!("0 {}", state.realname);
    ctx.server
        .reply(ctx.client, Numeric::RPL_WHOREPLY, &args, Some(&text))
        .await;
}

pub struct Whois;

#[async_trait]
impl Handler for Whois {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        // an empty WHOIS is silently ignored
        let Some(masks) = params.first() else {
            return Ok(());
        };

        for mask in masks.split(',') {
            let mask = irc_to_lower(mask);
            for other in ctx.server.registry.clients() {
                let folded = other.folded_nick().await;
                if !wildcard_match(&mask, &folded) {
                    continue;
                }
                whois_one(ctx, &other).await;
            }
        }

        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_ENDOFWHOIS,
                &[],
                Some("End of /WHOIS list"),
            )
            .await;
        Ok(())
    }
}

async fn whois_one(ctx: &Context<'_>, target: &Arc<Client>) {
    let (nick, user, realname, invisible, oper, idle_secs) = {
        let state = target.state.read().await;
        (
            state.nick.clone(),
            state.user.clone(),
            state.realname.clone(),
            state.modes.invisible,
            state.modes.oper,
            (Utc::now().timestamp() - state.last_activity).max(0),
        )
    };

    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_WHOISUSER,
            &[nick.as_str(), user.as_str(), target.host.as_str(), "*"],
            Some(&realname),
        )
        .await;
    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_WHOISSERVER,
            &[nick.as_str(), ctx.server.name()],
            Some(&ctx.server.config.server.network),
        )
        .await;
    if oper {
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_WHOISOPERATOR,
                &[nick.as_str()],
                Some("is an IRC operator"),
            )
            .await;
    }
    let idle = idle_secs.to_string();
    let signon = target.joined_at.to_string();
    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_WHOISIDLE,
            &[nick.as_str(), idle.as_str(), signon.as_str()],
            Some("seconds idle, signon time"),
        )
        .await;

    // channel list, hiding secret channels and invisible users from
    // strangers
    let requester_nick = ctx.client.id().await;
    let mut entries = Vec::new();
    for channel in ctx.server.registry.channels() {
        let guard = channel.read().await;
        let requester_in = guard.is_member(&requester_nick);
        let target_member = guard.member(&nick);

        let Some(member) = target_member else {
            continue;
        };
        if (guard.modes.secret || invisible) && !requester_in {
            continue;
        }

        match member.highest_prefix() {
            Some(p) => entries.push(format!("{p}{}", guard.name)),
            None => entries.push(guard.name.clone()),
        }
    }
    if !entries.is_empty() {
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_WHOISCHANNELS,
                &[nick.as_str()],
                Some(&entries.join(" ")),
            )
            .await;
    }
}
