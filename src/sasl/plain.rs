//! SASL PLAIN (RFC 4616).

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};

use super::{SaslError, Step};
use crate::db::Db;

/// The PLAIN mechanism: one message, `authzid \0 authcid \0 password`.
#[derive(Debug, Default)]
pub struct Plain;

impl Plain {
    pub(super) async fn next(&mut self, response: &[u8], db: &Db) -> Result<Step, SaslError> {
        let mut parts = response.split(|&b| b == 0);
        let (Some(_authzid), Some(authcid), Some(password), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SaslError::fail("malformed PLAIN response"));
        };

        let authcid = std::str::from_utf8(authcid)
            .map_err(|_| SaslError::fail("malformed PLAIN response"))?;
        if authcid.is_empty() {
            return Err(SaslError::fail("empty authentication identity"));
        }

        let stored = db
            .plain_credential(authcid)
            .await?
            .ok_or(SaslError::UnknownUser)?;

        let hash =
            PasswordHash::new(&stored).map_err(|_| SaslError::fail("corrupt stored credential"))?;
        Argon2::default()
            .verify_password(password, &hash)
            .map_err(|_| SaslError::fail("invalid credentials"))?;

        Ok(Step::Done {
            account: authcid.to_string(),
            verifier: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::PasswordHasher;

    async fn db_with_user(user: &str, password: &str) -> Db {
        let db = Db::open(":memory:").await.unwrap();
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string();
        db.upsert_plain(user, &hash).await.unwrap();
        db
    }

    #[tokio::test]
    async fn accepts_correct_password() {
        let db = db_with_user("alice", "pass").await;
        let mut mech = Plain;

        let step = mech.next(b"\0alice\0pass", &db).await.unwrap();
        match step {
            Step::Done { account, verifier } => {
                assert_eq!(account, "alice");
                assert!(verifier.is_none());
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let db = db_with_user("alice", "pass").await;
        let mut mech = Plain;

        assert!(matches!(
            mech.next(b"\0alice\0wrong", &db).await,
            Err(SaslError::Fail(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user() {
        let db = Db::open(":memory:").await.unwrap();
        let mut mech = Plain;

        assert!(matches!(
            mech.next(b"\0ghost\0pass", &db).await,
            Err(SaslError::UnknownUser)
        ));
    }

    #[tokio::test]
    async fn malformed_response() {
        let db = db_with_user("alice", "pass").await;
        let mut mech = Plain;

        assert!(matches!(
            mech.next(b"no separators", &db).await,
            Err(SaslError::Fail(_))
        ));
        assert!(matches!(
            mech.next(b"a\0b\0c\0d", &db).await,
            Err(SaslError::Fail(_))
        ));
    }
}
