//! murmurd entry point.
//!
//! `murmurd [config.toml]` runs the server; `murmurd set-pass` and
//! `murmurd add-oper` are the configuration setup modes.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use murmurd::config::Config;
use murmurd::db::Db;
use murmurd::network;
use murmurd::server::Server;
use murmurd::setup;

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("set-pass") => {
            let path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
            return setup::set_pass(&path);
        }
        Some("add-oper") => {
            let path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
            return setup::add_oper(&path);
        }
        Some(path) => run(path.to_string()).await,
        None => run(DEFAULT_CONFIG.to_string()).await,
    }
}

async fn run(config_path: String) -> anyhow::Result<()> {
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(
        server = %config.server.name,
        network = %config.server.network,
        "starting murmurd"
    );

    let db = Db::open(&config.database.path).await?;
    let server = Server::new(config, db);

    // SIGINT drains connections and stops the listeners
    let shutdown = server.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    network::run(Arc::clone(&server)).await
}
