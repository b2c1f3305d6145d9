//! Parse errors surfaced by the tokenizer and message grammar.

use thiserror::Error;

/// Errors produced while parsing a wire line into a [`Message`].
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The tag section exceeded 8,191 bytes or the body exceeded 512 bytes.
    ///
    /// Connections feeding oversized lines are closed by the server.
    #[error("message too large")]
    MsgSizeOverflow,

    /// The line did not match the message grammar. Such lines are
    /// silently dropped.
    #[error("parse error: {0}")]
    Parse(&'static str),
}
