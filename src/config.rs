//! Server configuration.
//!
//! Loaded from a TOML file. Secrets (the server password, operator
//! passwords) are stored as argon2 PHC strings written by the setup
//! subcommands, never in the clear.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,

    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Argon2 hash of the server password, if one is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Operator credentials.
    #[serde(default, rename = "oper")]
    pub opers: Vec<OperBlock>,
}

/// Server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This server's name (appears as the source of numerics).
    pub name: String,
    /// Network name shown in RPL_WELCOME.
    pub network: String,
    /// MOTD lines.
    #[serde(default)]
    pub motd: Vec<String>,
}

/// Listening endpoints. Both are optional; a server with neither
/// configured accepts nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Plain TCP endpoint.
    #[serde(default = "default_plain_addr", skip_serializing_if = "Option::is_none")]
    pub plain: Option<SocketAddr>,
    /// TLS endpoint; requires `[tls]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<SocketAddr>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            plain: default_plain_addr(),
            tls: None,
        }
    }
}

fn default_plain_addr() -> Option<SocketAddr> {
    Some(([0, 0, 0, 0], 6667).into())
}

/// TLS material and STS policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
    /// `duration=` advertised in the `sts` capability, seconds.
    #[serde(default = "default_sts_duration")]
    pub sts_duration: u64,
}

fn default_sts_duration() -> u64 {
    2_592_000 // 30 days
}

/// Keepalive and flood-control timing. Shortened in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Seconds of idle time between server PINGs.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds a client has to answer a PING with PONG.
    #[serde(default = "default_pong_grace")]
    pub pong_grace: u64,
    /// Seconds between flood-bucket grant refills.
    #[serde(default = "default_flood_refill")]
    pub flood_refill: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            pong_grace: default_pong_grace(),
            flood_refill: default_flood_refill(),
        }
    }
}

fn default_ping_interval() -> u64 {
    300
}

fn default_pong_grace() -> u64 {
    10
}

fn default_flood_refill() -> u64 {
    2
}

/// Credential store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    ":memory:".to_string()
}

/// One operator credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperBlock {
    pub name: String,
    /// Argon2 hash of the operator password.
    pub password: String,
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the configuration back out (used by the setup subcommands).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.example.net"
            network = "ExampleNet"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.ping_interval, 300);
        assert_eq!(config.timeouts.pong_grace, 10);
        assert_eq!(config.database.path, ":memory:");
        assert!(config.listen.plain.is_some());
        assert!(config.listen.tls.is_none());
        assert!(config.password.is_none());
        assert!(config.opers.is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let mut config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.example.net"
            network = "ExampleNet"
            motd = ["hello"]
            "#,
        )
        .unwrap();
        config.password = Some("$argon2id$fake".to_string());
        config.opers.push(OperBlock {
            name: "root".to_string(),
            password: "$argon2id$fake2".to_string(),
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.server.name, "irc.example.net");
        assert_eq!(reloaded.password.as_deref(), Some("$argon2id$fake"));
        assert_eq!(reloaded.opers.len(), 1);
    }
}
