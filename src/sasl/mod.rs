//! Server-side SASL mechanisms.
//!
//! A client's `AUTHENTICATE <mech>` instantiates a [`Mechanism`]; each
//! subsequent decoded response is fed to [`Mechanism::next`], which
//! either produces the next challenge or finishes the exchange. The
//! tagged-variant shape keeps dispatch static while the AUTHENTICATE
//! handler stays mechanism-agnostic.

mod external;
mod plain;
mod scram;

pub use external::External;
pub use plain::Plain;
pub use scram::{derive_credential, Scram};

use crate::db::Db;
use thiserror::Error;

/// Progress of a SASL exchange after consuming one client response.
#[derive(Debug)]
pub enum Step {
    /// Send this challenge (base64-encoded by the caller) and wait.
    Challenge(Vec<u8>),
    /// The exchange succeeded.
    Done {
        /// The authenticated account name.
        account: String,
        /// Final mechanism data to send before the success numerics
        /// (SCRAM's `v=` server signature).
        verifier: Option<Vec<u8>>,
    },
}

/// A failed SASL exchange.
#[derive(Debug, Error)]
pub enum SaslError {
    /// No credential stored for the named user.
    #[error("unknown user")]
    UnknownUser,

    /// The exchange failed; the text is surfaced in ERR_SASLFAIL.
    #[error("{0}")]
    Fail(String),

    #[error("credential lookup: {0}")]
    Db(#[from] sqlx::Error),
}

impl SaslError {
    fn fail(text: impl Into<String>) -> Self {
        Self::Fail(text.into())
    }
}

/// An in-progress SASL exchange.
#[derive(Debug)]
pub enum Mechanism {
    Plain(Plain),
    External(External),
    Scram(Scram),
}

impl Mechanism {
    /// The mechanisms advertised in `sasl=` and RPL_SASLMECHS.
    pub const SUPPORTED: &'static str = "PLAIN,EXTERNAL,SCRAM-SHA-256";

    /// Instantiate a mechanism by its advertised name.
    ///
    /// `certfp` is the connecting client's TLS certificate fingerprint,
    /// if it presented one (EXTERNAL needs it).
    pub fn from_name(name: &str, certfp: Option<String>) -> Option<Self> {
        match name {
            "PLAIN" => Some(Self::Plain(Plain)),
            "EXTERNAL" => Some(Self::External(External::new(certfp))),
            "SCRAM-SHA-256" => Some(Self::Scram(Scram::new())),
            _ => None,
        }
    }

    /// The wire name of this mechanism.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain(_) => "PLAIN",
            Self::External(_) => "EXTERNAL",
            Self::Scram(_) => "SCRAM-SHA-256",
        }
    }

    /// Feed one decoded client response to the exchange.
    pub async fn next(&mut self, response: &[u8], db: &Db) -> Result<Step, SaslError> {
        match self {
            Self::Plain(m) => m.next(response, db).await,
            Self::External(m) => m.next(response, db).await,
            Self::Scram(m) => m.next(response, db).await,
        }
    }
}
