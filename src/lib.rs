//! murmurd - a single-node IRC server.
//!
//! RFC 1459/2812 semantics with IRCv3 capability negotiation
//! (message-tags, server-time, SASL, multi-prefix, echo-message,
//! away-notify, setname, STS and friends). The wire protocol lives in
//! the `murmur-proto` crate; this crate is the daemon: configuration,
//! state registries, command handlers, SASL mechanisms, and the
//! listener/connection plumbing.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod network;
pub mod sasl;
pub mod server;
pub mod setup;
pub mod state;
