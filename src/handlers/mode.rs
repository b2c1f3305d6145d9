//! MODE, for users and channels.

use async_trait::async_trait;
use murmur_proto::{irc_eq, mode, Message, ModeKind, Numeric, Source};

use super::helpers::broadcast;
use super::{Context, Handler};
use crate::error::HandlerResult;
use crate::state::{is_channel_name, Channel, ListEntry};

pub struct Mode;

#[async_trait]
impl Handler for Mode {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(target) = params.first() else {
            let modes = ctx.client.state.read().await.modes.to_mode_string();
            ctx.server
                .reply(ctx.client, Numeric::RPL_UMODEIS, &[modes.as_str()], None)
                .await;
            return Ok(());
        };

        if is_channel_name(target) {
            channel_mode(ctx, target, &params[1..]).await
        } else {
            user_mode(ctx, target, &params[1..]).await
        }
    }
}

async fn user_mode(ctx: &Context<'_>, target: &str, rest: &[String]) -> HandlerResult {
    if ctx.server.registry.get_client(target).is_none() {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_NOSUCHNICK,
                &[target],
                Some("No such nick/channel"),
            )
            .await;
        return Ok(());
    }

    let nick = ctx.client.id().await;
    if !irc_eq(&nick, target) {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_USERSDONTMATCH,
                &[],
                Some("Cant change mode for other users"),
            )
            .await;
        return Ok(());
    }

    let Some(mode_str) = rest.first() else {
        let modes = ctx.client.state.read().await.modes.to_mode_string();
        ctx.server
            .reply(ctx.client, Numeric::RPL_UMODEIS, &[modes.as_str()], None)
            .await;
        return Ok(());
    };

    let changes = mode::parse(ModeKind::User, mode_str, &[]);
    let mut unknown = false;
    {
        let mut state = ctx.client.state.write().await;
        for change in &changes {
            if !state.modes.apply(change) {
                unknown = true;
            }
        }
    }
    if unknown {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_UMODEUNKNOWNFLAG,
                &[],
                Some("Unknown MODE flag"),
            )
            .await;
    }

    ctx.server
        .send_from_server(
            ctx.client,
            Message::new("MODE", vec![nick, mode_str.clone()]),
        )
        .await;
    Ok(())
}

async fn channel_mode(ctx: &Context<'_>, target: &str, rest: &[String]) -> HandlerResult {
    let Some(channel) = ctx.server.registry.get_channel(target) else {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_NOSUCHCHANNEL,
                &[target],
                Some("No such channel"),
            )
            .await;
        return Ok(());
    };

    let Some(mode_str) = rest.first() else {
        let (display_name, letters, mode_params) = {
            let guard = channel.read().await;
            let (letters, mode_params) = guard.mode_summary();
            (guard.name.clone(), letters, mode_params)
        };
        let mut args = vec![display_name.as_str(), letters.as_str()];
        let joined = mode_params.join(" ");
        if !joined.is_empty() {
            args.push(&joined);
        }
        ctx.server
            .reply(ctx.client, Numeric::RPL_CHANNELMODEIS, &args, None)
            .await;
        return Ok(());
    };

    let changes = mode::parse(ModeKind::Channel, mode_str, &rest[1..]);
    let nick = ctx.client.id().await;
    let mut applied = Vec::new();
    let mut privileged = None; // lazily checked on the first modification

    for change in changes {
        // a list mode with no argument is a query, open to anyone
        if change.param.is_none() && mode::is_list_mode(change.mode) {
            send_mode_list(ctx, &channel, change.mode).await;
            continue;
        }

        if privileged.is_none() {
            let (is_member, is_op, display_name) = {
                let guard = channel.read().await;
                (
                    guard.is_member(&nick),
                    guard.member(&nick).is_some_and(|m| m.is_op()),
                    guard.name.clone(),
                )
            };
            if !is_member {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::ERR_NOTONCHANNEL,
                        &[display_name.as_str()],
                        Some("You're not on that channel"),
                    )
                    .await;
                return Ok(());
            }
            if !is_op {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::ERR_CHANOPRIVSNEEDED,
                        &[display_name.as_str()],
                        Some("You're not channel operator"),
                    )
                    .await;
                return Ok(());
            }
            privileged = Some(true);
        }

        apply_channel_change(ctx, &channel, &nick, change, &mut applied).await?;
    }

    if !applied.is_empty() {
        let display_name = channel.read().await.name.clone();
        let (letters, mode_params) = mode::format(&applied);
        let mut params = vec![display_name, letters];
        params.extend(mode_params);
        let msg = Message::new("MODE", params)
            .with_source(Source::server(ctx.server.name().to_string()));
        broadcast(ctx.server, &channel, &msg, None, None).await;
    }

    Ok(())
}

async fn apply_channel_change(
    ctx: &Context<'_>,
    channel: &std::sync::Arc<tokio::sync::RwLock<Channel>>,
    setter: &str,
    change: murmur_proto::ModeChange,
    applied: &mut Vec<murmur_proto::ModeChange>,
) -> HandlerResult {
    let now = chrono::Utc::now().timestamp();

    match change.mode {
        'i' | 'm' | 's' | 't' | 'n' => {
            let mut guard = channel.write().await;
            match change.mode {
                'i' => guard.modes.invite_only = change.add,
                'm' => guard.modes.moderated = change.add,
                's' => guard.modes.secret = change.add,
                't' => guard.modes.topic_lock = change.add,
                'n' => guard.modes.no_external = change.add,
                _ => unreachable!(),
            }
            applied.push(change);
        }
        'k' => {
            if change.add {
                let Some(key) = change.param.clone() else {
                    send_need_more_params(ctx).await;
                    return Ok(());
                };
                channel.write().await.key = Some(key);
            } else {
                channel.write().await.key = None;
            }
            applied.push(change);
        }
        'l' => {
            if change.add {
                let Some(limit) = change.param.as_deref().and_then(|p| p.parse().ok()) else {
                    send_need_more_params(ctx).await;
                    return Ok(());
                };
                channel.write().await.limit = Some(limit);
            } else {
                channel.write().await.limit = None;
            }
            applied.push(change);
        }
        'b' | 'e' | 'I' => {
            let mask = change.param.clone().unwrap_or_default();
            let entry = ListEntry {
                mask: mask.clone(),
                set_by: setter.to_string(),
                set_at: now,
            };
            let mut guard = channel.write().await;
            let list = match change.mode {
                'b' => &mut guard.bans,
                'e' => &mut guard.excepts,
                _ => &mut guard.invex,
            };
            let changed = if change.add {
                Channel::add_list_entry(list, entry)
            } else {
                Channel::remove_list_entry(list, &mask)
            };
            if changed {
                applied.push(change);
            }
        }
        m if mode::is_membership_mode(m) => {
            let target = change.param.clone().unwrap_or_default();
            let prefix = mode::prefix_for_mode(m).expect("membership mode has a prefix");

            let (found, display_name) = {
                let mut guard = channel.write().await;
                let display_name = guard.name.clone();
                match guard.member_mut(&target) {
                    Some(member) => {
                        if change.add {
                            member.grant(prefix);
                        } else {
                            member.revoke(prefix);
                        }
                        (true, display_name)
                    }
                    None => (false, display_name),
                }
            };

            if found {
                applied.push(change);
            } else {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::ERR_USERNOTINCHANNEL,
                        &[target.as_str(), display_name.as_str()],
                        Some("They aren't on that channel"),
                    )
                    .await;
            }
        }
        other => {
            let display_name = channel.read().await.name.clone();
            let letter = other.to_string();
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_UNKNOWNMODE,
                    &[letter.as_str(), display_name.as_str()],
                    Some("is unknown mode char to me"),
                )
                .await;
        }
    }

    Ok(())
}

async fn send_need_more_params(ctx: &Context<'_>) {
    ctx.server
        .reply(
            ctx.client,
            Numeric::ERR_NEEDMOREPARAMS,
            &["MODE"],
            Some("Not enough parameters"),
        )
        .await;
}

/// Answer a `+b`/`+e`/`+I` query with the list and its end numeric.
async fn send_mode_list(
    ctx: &Context<'_>,
    channel: &std::sync::Arc<tokio::sync::RwLock<Channel>>,
    mode_char: char,
) {
    let (display_name, masks) = {
        let guard = channel.read().await;
        let list = match mode_char {
            'b' => &guard.bans,
            'e' => &guard.excepts,
            _ => &guard.invex,
        };
        (
            guard.name.clone(),
            list.iter().map(|e| e.mask.clone()).collect::<Vec<_>>(),
        )
    };

    let (entry_num, end_num, end_text) = match mode_char {
        'b' => (
            Numeric::RPL_BANLIST,
            Numeric::RPL_ENDOFBANLIST,
            "End of channel ban list",
        ),
        'e' => (
            Numeric::RPL_EXCEPTLIST,
            Numeric::RPL_ENDOFEXCEPTLIST,
            "End of channel exception list",
        ),
        _ => (
            Numeric::RPL_INVITELIST,
            Numeric::RPL_ENDOFINVITELIST,
            "End of channel invite exception list",
        ),
    };

    for mask in masks {
        ctx.server
            .reply(ctx.client, entry_num, &[display_name.as_str(), mask.as_str()], None)
            .await;
    }
    ctx.server
        .reply(ctx.client, end_num, &[display_name.as_str()], Some(end_text))
        .await;
}
