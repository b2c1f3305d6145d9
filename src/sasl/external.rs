//! SASL EXTERNAL: TLS client-certificate authentication.

use subtle::ConstantTimeEq;

use super::{SaslError, Step};
use crate::db::Db;

/// The EXTERNAL mechanism. The single client message is the asserted
/// authorization identity; the proof is the certificate fingerprint
/// captured during the TLS handshake.
#[derive(Debug)]
pub struct External {
    certfp: Option<String>,
}

impl External {
    pub fn new(certfp: Option<String>) -> Self {
        Self { certfp }
    }

    pub(super) async fn next(&mut self, response: &[u8], db: &Db) -> Result<Step, SaslError> {
        let authzid = std::str::from_utf8(response)
            .map_err(|_| SaslError::fail("malformed EXTERNAL response"))?;
        if authzid.is_empty() {
            return Err(SaslError::fail("authorization identity required"));
        }

        let Some(certfp) = &self.certfp else {
            return Err(SaslError::fail("TLS client certificate required"));
        };

        let stored = db
            .external_credential(authzid)
            .await?
            .ok_or(SaslError::UnknownUser)?;

        if stored.as_bytes().ct_eq(certfp.as_bytes()).into() {
            Ok(Step::Done {
                account: authzid.to_string(),
                verifier: None,
            })
        } else {
            Err(SaslError::fail("certificate fingerprint mismatch"))
        }
    }
}
