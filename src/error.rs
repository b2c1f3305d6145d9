//! Error types for the daemon.

use murmur_proto::{Message, Numeric, Source};
use thiserror::Error;

/// Errors surfaced while handling a command.
///
/// Most handlers write their numerics directly; these variants cover the
/// failures the dispatcher reports centrally.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not enough parameters for {0}")]
    NeedMoreParams(String),

    #[error("no nickname given")]
    NoNicknameGiven,

    /// The client's outbound queue is gone; the connection is closing.
    #[error("client is disconnecting")]
    Gone,
}

impl HandlerError {
    /// Convert to a numeric reply, `None` when nothing should be sent.
    pub fn to_reply(&self, server_name: &str, nick: &str) -> Option<Message> {
        let (num, args, text): (Numeric, Vec<String>, &str) = match self {
            Self::NeedMoreParams(cmd) => (
                Numeric::ERR_NEEDMOREPARAMS,
                vec![cmd.clone()],
                "Not enough parameters",
            ),
            Self::NoNicknameGiven => (Numeric::ERR_NONICKNAMEGIVEN, vec![], "No nickname given"),
            Self::Gone => return None,
        };

        let mut params = vec![nick.to_string()];
        params.extend(args);
        params.push(text.to_string());
        Some(
            Message::new(num.code(), params)
                .with_source(Source::server(server_name))
                .with_trailing(),
        )
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Channel admission failures, in the order JOIN checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("cannot join channel (+k)")]
    BadKey,

    #[error("cannot join channel (+l)")]
    Full,

    #[error("cannot join channel (+i)")]
    InviteOnly,

    #[error("cannot join channel (+b)")]
    Banned,
}

impl JoinError {
    /// The numeric this failure maps to.
    pub fn numeric(self) -> Numeric {
        match self {
            Self::BadKey => Numeric::ERR_BADCHANNELKEY,
            Self::Full => Numeric::ERR_CHANNELISFULL,
            Self::InviteOnly => Numeric::ERR_INVITEONLYCHAN,
            Self::Banned => Numeric::ERR_BANNEDFROMCHAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needmoreparams_reply_shape() {
        let reply = HandlerError::NeedMoreParams("JOIN".into())
            .to_reply("irc.example.net", "alice")
            .unwrap();
        assert_eq!(
            reply.to_string(),
            ":irc.example.net 461 alice JOIN :Not enough parameters"
        );
    }

    #[test]
    fn gone_has_no_reply() {
        assert!(HandlerError::Gone.to_reply("srv", "alice").is_none());
    }
}
