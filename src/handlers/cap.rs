//! CAP negotiation and SASL AUTHENTICATE.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use murmur_proto::{Cap, Message, Numeric};
use tracing::debug;

use super::connection::try_complete_registration;
use super::{need_more_params, Context, Handler};
use crate::error::HandlerResult;
use crate::sasl::{Mechanism, SaslError, Step};
use crate::server::Server;
use crate::state::{BASE_READ_LIMIT, TAGGED_READ_LIMIT};

/// SASL payloads chunk at 400 bytes; an exact-length line means a
/// continuation follows.
const SASL_CHUNK: usize = 400;

pub struct CapCmd;

#[async_trait]
impl Handler for CapCmd {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let Some(sub) = params.first() else {
            return Err(need_more_params("CAP"));
        };

        match sub.to_uppercase().as_str() {
            "LS" => cap_ls(ctx, params.get(1)).await,
            "LIST" => cap_list(ctx).await,
            "REQ" => cap_req(ctx, params.get(1)).await,
            "END" => cap_end(ctx).await,
            other => {
                debug!(subcommand = %other, "ignoring CAP subcommand");
            }
        }
        Ok(())
    }
}

/// The capability list for CAP LS, with values at 302 and up.
fn cap_list_string(server: &Server, version: u32) -> String {
    let mut entries = Vec::new();
    for cap in Cap::ALL {
        let value = match cap {
            Cap::Sasl => Some(Mechanism::SUPPORTED.to_string()),
            Cap::Sts => match (&server.config.tls, server.config.listen.tls) {
                (Some(tls), Some(addr)) => {
                    Some(format!("port={},duration={}", addr.port(), tls.sts_duration))
                }
                // no TLS endpoint means no STS policy to advertise
                _ => continue,
            },
            _ => None,
        };
        match value {
            Some(v) if version >= 302 => entries.push(format!("{cap}={v}")),
            _ => entries.push(cap.to_string()),
        }
    }
    entries.join(" ")
}

async fn cap_ls(ctx: &Context<'_>, version: Option<&String>) {
    let version: u32 = version.and_then(|v| v.parse().ok()).unwrap_or(0);

    {
        let mut state = ctx.client.state.write().await;
        state.cap_version = state.cap_version.max(version);
        if !state.modes.registered {
            state.reg_suspended = true;
        }
    }

    let id = ctx.client.id().await;
    let caps = cap_list_string(ctx.server, version);

    // long lists continue across lines, all but the last marked with '*'
    let mut remaining = caps.as_str();
    loop {
        let (line, rest) = split_cap_line(remaining);
        let mut params = vec![id.clone(), "LS".to_string()];
        if rest.is_some() {
            params.push("*".to_string());
        }
        params.push(line.to_string());
        ctx.server
            .send_from_server(
                ctx.client,
                Message::new("CAP", params).with_trailing(),
            )
            .await;
        match rest {
            Some(r) => remaining = r,
            None => break,
        }
    }
}

/// Split a capability list at a space boundary under 400 bytes.
fn split_cap_line(caps: &str) -> (&str, Option<&str>) {
    const LIMIT: usize = 400;
    if caps.len() <= LIMIT {
        return (caps, None);
    }
    let cut = caps[..LIMIT].rfind(' ').unwrap_or(LIMIT);
    (&caps[..cut], Some(caps[cut..].trim_start()))
}

async fn cap_list(ctx: &Context<'_>) {
    let enabled: Vec<String> = {
        let state = ctx.client.state.read().await;
        state.caps.iter().map(|c| c.to_string()).collect()
    };
    let id = ctx.client.id().await;
    ctx.server
        .send_from_server(
            ctx.client,
            Message::new("CAP", vec![id, "LIST".to_string(), enabled.join(" ")]).with_trailing(),
        )
        .await;
}

async fn cap_req(ctx: &Context<'_>, request: Option<&String>) {
    let raw = request.map(String::as_str).unwrap_or("").to_string();

    // validate the whole request before touching any state: REQ is
    // all-or-nothing
    let mut changes: Vec<(Cap, bool)> = Vec::new();
    let mut valid = true;
    for item in raw.split_whitespace() {
        let (name, enable) = match item.strip_prefix('-') {
            Some(name) => (name, false),
            None => (item, true),
        };
        match Cap::from_name(name) {
            Some(cap) => changes.push((cap, enable)),
            None => {
                valid = false;
                break;
            }
        }
    }

    let id = ctx.client.id().await;
    if !valid {
        ctx.server
            .send_from_server(
                ctx.client,
                Message::new("CAP", vec![id, "NAK".to_string(), raw]).with_trailing(),
            )
            .await;
        return;
    }

    {
        let mut state = ctx.client.state.write().await;
        if !state.modes.registered {
            state.reg_suspended = true;
        }
        for (cap, enable) in &changes {
            if *enable {
                state.caps.insert(*cap);
            } else {
                state.caps.remove(cap);
            }
            // the tag budget changes the reader's line limit; the store
            // is ordered so the next read sees it
            if *cap == Cap::MessageTags {
                ctx.client.set_read_limit(if *enable {
                    TAGGED_READ_LIMIT
                } else {
                    BASE_READ_LIMIT
                });
            }
        }
    }

    ctx.server
        .send_from_server(
            ctx.client,
            Message::new("CAP", vec![id, "ACK".to_string(), raw]).with_trailing(),
        )
        .await;
}

async fn cap_end(ctx: &Context<'_>) {
    ctx.client.state.write().await.reg_suspended = false;
    try_complete_registration(ctx.server, ctx.client).await;
}

pub struct Authenticate;

#[async_trait]
impl Handler for Authenticate {
    async fn handle(&self, ctx: &Context<'_>, params: &[String]) -> HandlerResult {
        let (registered, authenticated, in_progress) = {
            let state = ctx.client.state.read().await;
            (
                state.modes.registered,
                state.authenticated,
                state.sasl.is_some(),
            )
        };

        if authenticated {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::ERR_SASLALREADY,
                    &[],
                    Some("You have already authenticated using SASL"),
                )
                .await;
            return Ok(());
        }

        // registration completing mid-exchange abandons the exchange
        if registered && in_progress {
            abort_sasl(ctx).await;
            return Ok(());
        }

        let Some(arg) = params.first() else {
            return Err(need_more_params("AUTHENTICATE"));
        };

        if arg.as_str() == "*" {
            abort_sasl(ctx).await;
            return Ok(());
        }

        if !in_progress {
            start_mechanism(ctx, arg).await;
            return Ok(());
        }

        // continuation chunks of exactly 400 bytes buffer until a short
        // line (or "+", the empty final) arrives
        if arg.len() == SASL_CHUNK {
            ctx.client.state.write().await.sasl_buf.push_str(arg);
            return Ok(());
        }

        let payload = {
            let mut state = ctx.client.state.write().await;
            let mut buf = std::mem::take(&mut state.sasl_buf);
            if arg.as_str() != "+" {
                buf.push_str(arg);
            }
            buf
        };

        let Ok(decoded) = BASE64.decode(payload.as_bytes()) else {
            sasl_fail(ctx, "SASL authentication failed").await;
            return Ok(());
        };

        advance_exchange(ctx, &decoded).await;
        Ok(())
    }
}

async fn start_mechanism(ctx: &Context<'_>, name: &str) {
    match Mechanism::from_name(name, ctx.client.certfp.clone()) {
        Some(mech) => {
            debug!(mechanism = %mech.name(), "SASL exchange started");
            ctx.client.state.write().await.sasl = Some(mech);
            // every supported mechanism is client-first: empty challenge
            ctx.client
                .send(Message::new("AUTHENTICATE", vec!["+".to_string()]))
                .await;
        }
        None => {
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_SASLMECHS,
                    &[Mechanism::SUPPORTED],
                    Some("are available SASL mechanisms"),
                )
                .await;
        }
    }
}

async fn advance_exchange(ctx: &Context<'_>, response: &[u8]) {
    let mut mech = match ctx.client.state.write().await.sasl.take() {
        Some(m) => m,
        None => return,
    };

    match mech.next(response, &ctx.server.db).await {
        Ok(Step::Challenge(challenge)) => {
            ctx.client.state.write().await.sasl = Some(mech);
            send_payload(ctx, &challenge).await;
        }
        Ok(Step::Done { account, verifier }) => {
            if let Some(verifier) = verifier {
                send_payload(ctx, &verifier).await;
            }

            {
                let mut state = ctx.client.state.write().await;
                state.authenticated = true;
                state.account = Some(account.clone());
            }

            let prefix = ctx.client.prefix().await.to_string();
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_LOGGEDIN,
                    &[prefix.as_str(), account.as_str()],
                    Some(&format!("You are now logged in as {account}")),
                )
                .await;
            ctx.server
                .reply(
                    ctx.client,
                    Numeric::RPL_SASLSUCCESS,
                    &[],
                    Some("SASL authentication successful"),
                )
                .await;
        }
        Err(SaslError::UnknownUser) => sasl_fail(ctx, "SASL authentication failed").await,
        Err(SaslError::Fail(reason)) => sasl_fail(ctx, &reason).await,
        Err(SaslError::Db(e)) => {
            tracing::warn!(error = %e, "credential lookup failed");
            sasl_fail(ctx, "SASL authentication failed").await;
        }
    }
}

/// Send a mechanism payload base64-encoded, split into 400-byte chunks.
/// An exact-multiple payload ends with the empty `+` line so the client
/// knows it is complete.
async fn send_payload(ctx: &Context<'_>, payload: &[u8]) {
    let encoded = BASE64.encode(payload);
    let mut rest = encoded.as_str();

    loop {
        let (chunk, remainder) = if rest.len() > SASL_CHUNK {
            rest.split_at(SASL_CHUNK)
        } else {
            (rest, "")
        };
        ctx.client
            .send(Message::new("AUTHENTICATE", vec![chunk.to_string()]))
            .await;
        if remainder.is_empty() {
            if chunk.len() == SASL_CHUNK {
                ctx.client
                    .send(Message::new("AUTHENTICATE", vec!["+".to_string()]))
                    .await;
            }
            break;
        }
        rest = remainder;
    }
}

async fn abort_sasl(ctx: &Context<'_>) {
    {
        let mut state = ctx.client.state.write().await;
        state.sasl = None;
        state.sasl_buf.clear();
    }
    ctx.server
        .reply(
            ctx.client,
            Numeric::ERR_SASLABORTED,
            &[],
            Some("SASL authentication aborted"),
        )
        .await;
}

async fn sasl_fail(ctx: &Context<'_>, reason: &str) {
    {
        let mut state = ctx.client.state.write().await;
        state.sasl = None;
        state.sasl_buf.clear();
    }
    ctx.server
        .reply(ctx.client, Numeric::ERR_SASLFAIL, &[], Some(reason))
        .await;
}
