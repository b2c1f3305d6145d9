//! Channel verbs: JOIN, PART, TOPIC, NAMES, LIST, INVITE, KICK.

use async_trait::async_trait;
use murmur_proto::{irc_to_lower, Cap, Message, Numeric};
use tracing::debug;

use super::helpers::{broadcast, member_channel};
use super::{need_more_params, Context, Handler};
use crate::error::HandlerResult;
use crate::state::{is_channel_name, Member};

pub struct Join;

#[async_trait]
impl Handler for Join {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(targets) = params.first() else {
            return Err(need_more_params("JOIN"));
        };

        // JOIN 0 parts every channel the client is in
        if targets.as_str() == "0" {
            let names: Vec<String> = {
                let state = ctx.client.state.read().await;
                state.channels.iter().cloned().collect()
            };
            for name in names {
                part_one(ctx, &name, None).await;
            }
            return Ok(());
        }

        let keys: Vec<&str> = params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();

        for (i, name) in targets.split(',').enumerate() {
            join_one(ctx, name, keys.get(i).copied()).await;
        }
        Ok(())
    }
}

async fn join_one(ctx: &Context<'_>, name: &str, key: Option<&str>) {
    if !is_channel_name(name) {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_NOSUCHCHANNEL,
                &[name],
                Some("No such channel"),
            )
            .await;
        return;
    }

    let nick = ctx.client.id().await;
    let folded_nick = irc_to_lower(&nick);
    let hostmask = ctx.client.hostmask().await;

    let Some((channel, created)) = ctx.server.registry.get_or_create_channel(name) else {
        return;
    };

    // admission and insertion under one write lock so a parallel joiner
    // cannot slip past the user limit
    let (display_name, topic) = {
        let mut guard = channel.write().await;

        if guard.is_member(&nick) {
            return;
        }

        if !created {
            if let Err(e) = guard.check_admission(&nick, &hostmask, key) {
                let name = guard.name.clone();
                drop(guard);
                ctx.server
                    .reply(ctx.client, e.numeric(), &[name.as_str()], Some(&e.to_string()))
                    .await;
                return;
            }
        }

        let mut member = Member::new(nick.clone());
        if created {
            member.grant('~'); // first joiner founds the channel
        }
        guard.members.insert(folded_nick.clone(), member);
        guard.invited.remove(&folded_nick);
        (guard.name.clone(), guard.topic.clone())
    };

    ctx.client
        .state
        .write()
        .await
        .channels
        .insert(irc_to_lower(&display_name));

    let join_msg = Message::new("JOIN", vec![display_name.clone()])
        .with_source(ctx.client.prefix().await);
    broadcast(ctx.server, &channel, &join_msg, None, None).await;

    if let Some(topic) = topic {
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_TOPIC,
                &[display_name.as_str()],
                Some(&topic),
            )
            .await;
    }

    send_names(ctx, &channel).await;
    debug!(channel = %display_name, nick = %nick, created, "join");
}

/// RPL_NAMREPLY + RPL_ENDOFNAMES for one channel.
async fn send_names(ctx: &Context<'_>, channel: &std::sync::Arc<tokio::sync::RwLock<crate::state::Channel>>) {
    let multi_prefix = ctx.client.has_cap(Cap::MultiPrefix).await;
    let (name, symbol, names) = {
        let guard = channel.read().await;
        let symbol = if guard.modes.secret { "@" } else { "=" };
        (guard.name.clone(), symbol, guard.names(multi_prefix))
    };

    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_NAMREPLY,
            &[symbol, name.as_str()],
            Some(&names),
        )
        .await;
    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_ENDOFNAMES,
            &[name.as_str()],
            Some("End of /NAMES list"),
        )
        .await;
}

pub struct Part;

#[async_trait]
impl Handler for Part {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(targets) = params.first() else {
            return Err(need_more_params("PART"));
        };

        for name in targets.split(',') {
            part_one(ctx, name, params.get(1).map(String::as_str)).await;
        }
        Ok(())
    }
}

async fn part_one(ctx: &Context<'_>, name: &str, reason: Option<&str>) {
    let Some(channel) = member_channel(ctx.server, ctx.client, name).await else {
        return;
    };

    let nick = ctx.client.id().await;
    let folded = irc_to_lower(&nick);
    let display_name = channel.read().await.name.clone();

    let mut part_params = vec![display_name.clone()];
    if let Some(reason) = reason {
        part_params.push(reason.to_string());
    }
    let mut part_msg = Message::new("PART", part_params).with_source(ctx.client.prefix().await);
    part_msg.trailing = part_msg.params.len() > 1;

    // departing member still sees their own PART
    broadcast(ctx.server, &channel, &part_msg, None, None).await;

    let now_empty = {
        let mut guard = channel.write().await;
        guard.members.remove(&folded);
        guard.members.is_empty()
    };
    if now_empty {
        ctx.server.registry.remove_channel(&display_name);
    }

    ctx.client
        .state
        .write()
        .await
        .channels
        .remove(&irc_to_lower(&display_name));
}

pub struct Topic;

#[async_trait]
impl Handler for Topic {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(name) = params.first() else {
            return Err(need_more_params("TOPIC"));
        };

        let Some(channel) = member_channel(ctx.server, ctx.client, name).await else {
            return Ok(());
        };

        let nick = ctx.client.id().await;

        if let Some(new_topic) = params.get(1) {
            let (allowed, display_name) = {
                let guard = channel.read().await;
                let allowed = !guard.modes.topic_lock
                    || guard.member(&nick).is_some_and(|m| m.is_halfop());
                (allowed, guard.name.clone())
            };
            if !allowed {
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

            channel.write().await.topic = if new_topic.is_empty() {
                None
            } else {
                Some(new_topic.clone())
            };

            let topic_msg =
                Message::new("TOPIC", vec![display_name.clone(), new_topic.clone()])
                    .with_source(ctx.client.prefix().await)
                    .with_trailing();
            broadcast(ctx.server, &channel, &topic_msg, None, None).await;
        } else {
            let (display_name, topic) = {
                let guard = channel.read().await;
                (guard.name.clone(), guard.topic.clone())
            };
            match topic {
                Some(text) => {
                    ctx.server
                        .reply(ctx.client, Numeric::RPL_TOPIC, &[display_name.as_str()], Some(&text))
                        .await
                }
                None => {
                    ctx.server
                        .reply(
                            ctx.client,
                            Numeric::RPL_NOTOPIC,
                            &[display_name.as_str()],
                            Some("No topic is set"),
                        )
                        .await
                }
            }
        }
        Ok(())
    }
}

pub struct Names;

#[async_trait]
impl Handler for Names {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(targets) = params.first() else {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_ENDOFNAMES,
                    &["*"],
                    Some("End of /NAMES list"),
                )
                .await;
            return Ok(());
        };

        let nick = ctx.client.id().await;
        for name in targets.split(',') {
            let visible = match ctx.server.registry.get_channel(name) {
                Some(channel) => {
                    let guard = channel.read().await;
                    let member = guard.is_member(&nick);
                    // secret channels stay hidden from outsiders
                    if !guard.modes.secret || member {
                        drop(guard);
                        send_names(ctx, &channel).await;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if !visible {
                ctx.server
                    .reply(
                        ctx.client,
                        Numeric::RPL_ENDOFNAMES,
                        &[name],
                        Some("End of /NAMES list"),
                    )
                    .await;
            }
        }
        Ok(())
    }
}

pub struct List;

#[async_trait]
impl Handler for List {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        match params.first() {
            None => {
                for channel in ctx.server.registry.channels() {
                    let guard = channel.read().await;
                    if guard.modes.secret {
                        continue;
                    }
                    list_line(ctx, &guard).await;
                }
            }
            Some(targets) => {
                for name in targets.split(',') {
                    if let Some(channel) = ctx.server.registry.get_channel(name) {
                        let guard = channel.read().await;
                        list_line(ctx, &guard).await;
                    }
                }
            }
        }

        ctx.server
            .reply(ctx.client, Numeric::RPL_LISTEND, &[], Some("End of /LIST"))
            .await;
        Ok(())
    }
}

async fn list_line(ctx: &Context<'_>, channel: &crate::state::Channel) {
    let count = channel.members.len().to_string();
    let topic = channel.topic.clone().unwrap_or_default();
    ctx.server
        .reply(
            ctx.client,
            Numeric::RPL_LIST,
            &[channel.name.as_str(), count.as_str()],
            Some(&topic),
        )
        .await;
}

pub struct Invite;

#[async_trait]
impl Handler for Invite {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        if params.len() != 2 {
            return Err(need_more_params("INVITE"));
        }
        let (target_nick, chan_name) = (&params[0], &params[1]);

        let Some(channel) = ctx.server.registry.get_channel(chan_name) else {
            return Ok(());
        };

        let nick = ctx.client.id().await;
        let (display_name, sender_member, sender_is_op, invite_only, target_on_channel) = {
            let guard = channel.read().await;
            (
                guard.name.clone(),
                guard.is_member(&nick),
                guard.member(&nick).is_some_and(|m| m.is_op()),
                guard.modes.invite_only,
                guard.is_member(target_nick),
            )
        };

        if !sender_member {
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
        if invite_only && !sender_is_op {
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

        let Some(recipient) = ctx.server.registry.get_client(target_nick) else {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_NOSUCHNICK,
                    &[target_nick.as_str()],
                    Some("No such nick/channel"),
                )
                .await;
            return Ok(());
        };

        if target_on_channel {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_USERONCHANNEL,
                    &[target_nick.as_str(), display_name.as_str()],
                    Some("is already on channel"),
                )
                .await;
            return Ok(());
        }

        channel
            .write()
            .await
            .invited
            .insert(irc_to_lower(target_nick));

        recipient
            .send(
                Message::new(
                    "INVITE",
                    vec![target_nick.clone(), display_name.clone()],
                )
                .with_source(ctx.client.prefix().await),
            )
            .await;
        ctx.server
            .reply(
                ctx.client,
                Numeric::RPL_INVITING,
                &[target_nick.as_str(), display_name.as_str()],
                None,
            )
            .await;
        Ok(())
    }
}

pub struct Kick;

#[async_trait]
impl Handler for Kick {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        if params.len() < 2 {
            return Err(need_more_params("KICK"));
        }

        let chans: Vec<&str> = params[0].split(',').collect();
        let users: Vec<&str> = params[1].split(',').collect();
        let default_comment = ctx.client.id().await;
        let comment = params
            .get(2)
            .map(String::as_str)
            .unwrap_or(default_comment.as_str());

        // one channel with many users, or pairwise lists
        let pairs: Vec<(&str, &str)> = if chans.len() == 1 {
            users.iter().map(|u| (chans[0], *u)).collect()
        } else if chans.len() == users.len() {
            chans.iter().copied().zip(users.iter().copied()).collect()
        } else {
            return Err(need_more_params("KICK"));
        };

        for (chan_name, target) in pairs {
            kick_one(ctx, chan_name, target, comment).await;
        }
        Ok(())
    }
}

async fn kick_one(ctx: &Context<'_>, chan_name: &str, target: &str, comment: &str) {
    let Some(channel) = member_channel(ctx.server, ctx.client, chan_name).await else {
        return;
    };

    let nick = ctx.client.id().await;
    let (display_name, kicker_is_op, target_member) = {
        let guard = channel.read().await;
        (
            guard.name.clone(),
            guard.member(&nick).is_some_and(|m| m.is_op()),
            guard.member(target).map(|m| m.nick.clone()),
        )
    };

    if !kicker_is_op {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_CHANOPRIVSNEEDED,
                &[display_name.as_str()],
                Some("You're not channel operator"),
            )
            .await;
        return;
    }

    let Some(target_nick) = target_member else {
        ctx.server
            .reply(
                ctx.client,
                Numeric::ERR_USERNOTINCHANNEL,
                &[target, display_name.as_str()],
                Some("They aren't on that channel"),
            )
            .await;
        return;
    };

    let kick_msg = Message::new(
        "KICK",
        vec![
            display_name.clone(),
            target_nick.clone(),
            comment.to_string(),
        ],
    )
    .with_source(ctx.client.prefix().await)
    .with_trailing();
    // the kicked member sees the KICK too
    broadcast(ctx.server, &channel, &kick_msg, None, None).await;

    let now_empty = {
        let mut guard = channel.write().await;
        guard.members.remove(&irc_to_lower(&target_nick));
        guard.members.is_empty()
    };
    if now_empty {
        ctx.server.registry.remove_channel(&display_name);
    }

    if let Some(kicked) = ctx.server.registry.get_client(&target_nick) {
        kicked
            .state
            .write()
            .await
            .channels
            .remove(&irc_to_lower(&display_name));
    }
}
