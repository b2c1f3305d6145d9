//! Server side of SCRAM-SHA-256 (RFC 5802, RFC 7677).
//!
//! Exchange:
//!
//! 1. client-first: `n,,n=<user>,r=<client-nonce>`
//! 2. server-first: `r=<combined-nonce>,s=<salt>,i=<iterations>`
//! 3. client-final: `c=biws,r=<combined-nonce>,p=<proof>`
//! 4. server-final: `v=<server-signature>` (the `verifier` of
//!    [`Step::Done`])
//!
//! The stored credential holds `StoredKey = H(ClientKey)` and
//! `ServerKey`, so the password itself never reaches the server.
//! Failure texts carry the RFC 5802 `e=` tokens.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{SaslError, Step};
use crate::db::{Db, ScramCredential};

const NONCE_EXTENSION_LEN: usize = 20;

/// The SCRAM-SHA-256 mechanism state machine.
#[derive(Debug, Default)]
pub struct Scram {
    state: State,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Initial,
    /// Sent server-first, waiting for client-final.
    AwaitClientFinal {
        username: String,
        cred: ScramCredential,
        nonce: String,
        client_first_bare: String,
        server_first: String,
    },
    Finished,
}

impl Scram {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn next(&mut self, response: &[u8], db: &Db) -> Result<Step, SaslError> {
        match std::mem::take(&mut self.state) {
            State::Initial => self.client_first(response, db).await,
            State::AwaitClientFinal {
                username,
                cred,
                nonce,
                client_first_bare,
                server_first,
            } => self.client_final(
                response,
                username,
                cred,
                nonce,
                client_first_bare,
                server_first,
            ),
            State::Finished => Err(SaslError::fail("e=other-error")),
        }
    }

    /// `gs2-header "," client-first-message-bare`, e.g. `n,,n=user,r=nonce`.
    async fn client_first(&mut self, response: &[u8], db: &Db) -> Result<Step, SaslError> {
        let message =
            std::str::from_utf8(response).map_err(|_| SaslError::fail("e=invalid-encoding"))?;

        let attrs: Vec<&str> = message.split(',').collect();
        if attrs.len() < 4 {
            return Err(SaslError::fail("e=other-error"));
        }

        // attrs[1] is the unused authzid
        let username = attrs[2]
            .strip_prefix("n=")
            .ok_or_else(|| SaslError::fail("e=other-error"))?
            .to_string();
        let client_nonce = attrs[3]
            .strip_prefix("r=")
            .ok_or_else(|| SaslError::fail("e=other-error"))?;

        let cred = db
            .scram_credential(&username)
            .await?
            .ok_or(SaslError::UnknownUser)?;

        // extend the client nonce with fresh server entropy
        let mut extension = [0u8; NONCE_EXTENSION_LEN];
        rand::rngs::OsRng.fill_bytes(&mut extension);
        let nonce = format!("{}{}", client_nonce, BASE64.encode(extension));

        let server_first = format!(
            "r={},s={},i={}",
            nonce,
            BASE64.encode(&cred.salt),
            cred.iterations
        );
        let client_first_bare = attrs[2..].join(",");

        let challenge = server_first.clone().into_bytes();
        self.state = State::AwaitClientFinal {
            username,
            cred,
            nonce,
            client_first_bare,
            server_first,
        };

        Ok(Step::Challenge(challenge))
    }

    /// `c=biws,r=<combined>,p=<proof>`.
    fn client_final(
        &mut self,
        response: &[u8],
        username: String,
        cred: ScramCredential,
        nonce: String,
        client_first_bare: String,
        server_first: String,
    ) -> Result<Step, SaslError> {
        self.state = State::Finished;

        let message =
            std::str::from_utf8(response).map_err(|_| SaslError::fail("e=invalid-encoding"))?;

        let attrs: Vec<&str> = message.split(',').collect();
        if attrs.len() < 3 {
            return Err(SaslError::fail("e=other-error"));
        }

        // attrs[0] is the channel-binding attribute; binding is not used
        let client_nonce = attrs[1]
            .strip_prefix("r=")
            .ok_or_else(|| SaslError::fail("e=other-error"))?;
        if client_nonce != nonce {
            return Err(SaslError::fail("e=other-error"));
        }

        let proof_attr = attrs[attrs.len() - 1]
            .strip_prefix("p=")
            .ok_or_else(|| SaslError::fail("e=other-error"))?;
        let proof = BASE64
            .decode(proof_attr)
            .map_err(|_| SaslError::fail("e=invalid-encoding"))?;

        let client_final_without_proof = attrs[..attrs.len() - 1].join(",");
        let auth_message = format!(
            "{client_first_bare},{server_first},{client_final_without_proof}"
        );

        let client_signature = hmac_sha256(&cred.stored_key, auth_message.as_bytes());
        if proof.len() != client_signature.len() {
            return Err(SaslError::fail("e=invalid-proof"));
        }

        let client_key: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();

        let computed_stored_key = sha256(&client_key);
        if !bool::from(computed_stored_key[..].ct_eq(&cred.stored_key[..])) {
            return Err(SaslError::fail("e=invalid-proof"));
        }

        let server_signature = hmac_sha256(&cred.server_key, auth_message.as_bytes());
        let verifier = format!("v={}", BASE64.encode(server_signature)).into_bytes();

        Ok(Step::Done {
            account: username,
            verifier: Some(verifier),
        })
    }
}

/// Derive the stored server-side credential from a password.
///
/// `Hi()` from RFC 5802 is PBKDF2-HMAC-SHA-256; the derived keys are
/// what the credential store keeps.
pub fn derive_credential(password: &str, salt: &[u8], iterations: u32) -> ScramCredential {
    let mut salted_password = [0u8; 32];
    // the only failure mode is a zero-length output buffer
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut salted_password)
        .expect("32-byte output");

    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = sha256(&client_key);
    let server_key = hmac_sha256(&salted_password, b"Server Key");

    ScramCredential {
        server_key: server_key.to_vec(),
        stored_key: stored_key.to_vec(),
        salt: salt.to_vec(),
        iterations,
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db_with_scram(user: &str, password: &str, salt: &[u8], iterations: u32) -> Db {
        let db = Db::open(":memory:").await.unwrap();
        db.upsert_scram(user, &derive_credential(password, salt, iterations))
            .await
            .unwrap();
        db
    }

    /// Compute the client-side proof for a given exchange, as a real
    /// client would (RFC 5802 §3).
    fn client_proof(password: &str, salt: &[u8], iterations: u32, auth_message: &str) -> Vec<u8> {
        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, iterations, &mut salted_password)
            .unwrap();
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect()
    }

    struct Exchange {
        combined_nonce: String,
        client_first_bare: String,
        server_first: String,
    }

    async fn run_client_first(mech: &mut Scram, db: &Db, user: &str, nonce: &str) -> Exchange {
        let client_first = format!("n,,n={user},r={nonce}");
        let step = mech.next(client_first.as_bytes(), db).await.unwrap();
        let Step::Challenge(server_first) = step else {
            panic!("expected challenge");
        };
        let server_first = String::from_utf8(server_first).unwrap();

        let combined_nonce = server_first
            .split(',')
            .next()
            .unwrap()
            .strip_prefix("r=")
            .unwrap()
            .to_string();
        assert!(combined_nonce.starts_with(nonce));
        assert!(combined_nonce.len() > nonce.len());

        Exchange {
            combined_nonce,
            client_first_bare: format!("n={user},r={nonce}"),
            server_first,
        }
    }

    #[tokio::test]
    async fn full_exchange_with_correct_password() {
        // salt and iteration count from the RFC 7677 example
        let salt = BASE64.decode("W22ZaJ0SNY7soEsUEjb6gQ==").unwrap();
        let db = db_with_scram("user", "pencil", &salt, 4096).await;
        let mut mech = Scram::new();

        let ex = run_client_first(&mut mech, &db, "user", "rOprNGfwEbeRWgbNEkqO").await;

        let without_proof = format!("c=biws,r={}", ex.combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            ex.client_first_bare, ex.server_first, without_proof
        );
        let proof = client_proof("pencil", &salt, 4096, &auth_message);
        let client_final = format!("{},p={}", without_proof, BASE64.encode(&proof));

        let step = mech.next(client_final.as_bytes(), &db).await.unwrap();
        let Step::Done { account, verifier } = step else {
            panic!("expected done");
        };
        assert_eq!(account, "user");

        // the v= value must be the HMAC of the auth message under ServerKey
        let cred = derive_credential("pencil", &salt, 4096);
        let expected_sig = hmac_sha256(&cred.server_key, auth_message.as_bytes());
        let expected = format!("v={}", BASE64.encode(expected_sig));
        assert_eq!(String::from_utf8(verifier.unwrap()).unwrap(), expected);
    }

    #[tokio::test]
    async fn flipped_proof_bit_is_invalid_proof() {
        let salt = b"0123456789abcdef";
        let db = db_with_scram("user", "pencil", salt, 4096).await;
        let mut mech = Scram::new();

        let ex = run_client_first(&mut mech, &db, "user", "clientnonce").await;

        let without_proof = format!("c=biws,r={}", ex.combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            ex.client_first_bare, ex.server_first, without_proof
        );
        let mut proof = client_proof("pencil", salt, 4096, &auth_message);
        proof[0] ^= 0x01;
        let client_final = format!("{},p={}", without_proof, BASE64.encode(&proof));

        match mech.next(client_final.as_bytes(), &db).await {
            Err(SaslError::Fail(text)) => assert_eq!(text, "e=invalid-proof"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_nonce_rejected() {
        let salt = b"0123456789abcdef";
        let db = db_with_scram("user", "pencil", salt, 4096).await;
        let mut mech = Scram::new();

        let _ = run_client_first(&mut mech, &db, "user", "clientnonce").await;

        let client_final = format!("c=biws,r=forgednonce,p={}", BASE64.encode([0u8; 32]));
        assert!(matches!(
            mech.next(client_final.as_bytes(), &db).await,
            Err(SaslError::Fail(_))
        ));
    }

    #[tokio::test]
    async fn bad_base64_proof_is_invalid_encoding() {
        let salt = b"0123456789abcdef";
        let db = db_with_scram("user", "pencil", salt, 4096).await;
        let mut mech = Scram::new();

        let ex = run_client_first(&mut mech, &db, "user", "clientnonce").await;

        let client_final = format!("c=biws,r={},p=!!notbase64!!", ex.combined_nonce);
        match mech.next(client_final.as_bytes(), &db).await {
            Err(SaslError::Fail(text)) => assert_eq!(text, "e=invalid-encoding"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_user_reported() {
        let db = Db::open(":memory:").await.unwrap();
        let mut mech = Scram::new();

        assert!(matches!(
            mech.next(b"n,,n=ghost,r=abc", &db).await,
            Err(SaslError::UnknownUser)
        ));
    }
}
