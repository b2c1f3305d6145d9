//! SASL credential store.
//!
//! Three relations, one per mechanism: argon2 password hashes for PLAIN,
//! certificate fingerprints for EXTERNAL, and the RFC 5802 server-side
//! verifier material for SCRAM-SHA-256. The schema is created on open.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sasl_plain(
    username TEXT PRIMARY KEY,
    pass TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sasl_external(
    username TEXT PRIMARY KEY,
    client_cert TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sasl_scram(
    username TEXT PRIMARY KEY,
    server_key BLOB NOT NULL,
    stored_key BLOB NOT NULL,
    salt BLOB NOT NULL,
    iterations INTEGER NOT NULL
);
"#;

/// Server-side SCRAM verifier material for one user.
#[derive(Debug, Clone)]
pub struct ScramCredential {
    pub server_key: Vec<u8>,
    pub stored_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// Handle to the credential database.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if necessary) the credential store at `path`.
    /// `:memory:` opens an in-memory store.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // A single connection keeps the in-memory database alive and is
        // plenty for credential lookups.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Argon2 hash of the PLAIN password for `username`.
    pub async fn plain_credential(&self, username: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT pass FROM sasl_plain WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("pass")))
    }

    /// Stored certificate fingerprint (SHA-256 hex) for `username`.
    pub async fn external_credential(&self, username: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT client_cert FROM sasl_external WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("client_cert")))
    }

    /// SCRAM verifier material for `username`.
    pub async fn scram_credential(
        &self,
        username: &str,
    ) -> Result<Option<ScramCredential>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT server_key, stored_key, salt, iterations FROM sasl_scram WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ScramCredential {
            server_key: r.get("server_key"),
            stored_key: r.get("stored_key"),
            salt: r.get("salt"),
            iterations: r.get::<i64, _>("iterations") as u32,
        }))
    }

    /// Store (or replace) a PLAIN credential.
    pub async fn upsert_plain(&self, username: &str, pass_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR REPLACE INTO sasl_plain(username, pass) VALUES (?, ?)")
            .bind(username)
            .bind(pass_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store (or replace) an EXTERNAL credential.
    pub async fn upsert_external(
        &self,
        username: &str,
        cert_sha256_hex: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR REPLACE INTO sasl_external(username, client_cert) VALUES (?, ?)")
            .bind(username)
            .bind(cert_sha256_hex)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store (or replace) a SCRAM credential.
    pub async fn upsert_scram(
        &self,
        username: &str,
        cred: &ScramCredential,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO sasl_scram(username, server_key, stored_key, salt, iterations) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(&cred.server_key)
        .bind(&cred.stored_key)
        .bind(&cred.salt)
        .bind(cred.iterations as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
