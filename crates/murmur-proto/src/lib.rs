//! # murmur-proto
//!
//! Wire-protocol support for the murmur IRC server: the byte tokenizer,
//! the message grammar (RFC 1459/2812 plus IRCv3 message tags), the
//! mode-string parser, RFC 1459 case mapping, hostmask matching, numeric
//! reply codes, and the capability table.
//!
//! This crate is purely computational: no I/O, no async. The daemon
//! layers connection handling and state on top of it.
//!
//! ## Parsing
//!
//! ```
//! use murmur_proto::Message;
//!
//! let msg = Message::parse(b":alice!a@host PRIVMSG #room :hi there\r\n").unwrap();
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.params, vec!["#room", "hi there"]);
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod caps;
pub mod casemap;
pub mod error;
pub mod hostmask;
pub mod message;
pub mod mode;
pub mod numeric;
pub mod scan;

pub use self::caps::Cap;
pub use self::casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use self::error::ParseError;
pub use self::hostmask::{matches_hostmask, wildcard_match};
pub use self::message::{Message, Source, Tag};
pub use self::mode::{ModeChange, ModeKind};
pub use self::numeric::Numeric;

/// Maximum length of the tag section of a message, in bytes.
pub const MAX_TAGS_LEN: usize = 8191;

/// Maximum length of the message body (source + command + params + CRLF).
pub const MAX_BODY_LEN: usize = 512;
