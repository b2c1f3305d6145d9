//! Test server management.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

use murmurd::config::Config;
use murmurd::db::Db;
use murmurd::network;
use murmurd::server::Server;

/// An in-process murmurd instance bound to a fresh local port.
pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn base_config(addr: SocketAddr) -> Config {
    toml::from_str::<Config>(&format!(
        r#"
        [server]
        name = "irc.test"
        network = "TestNet"
        motd = ["welcome to the test network"]

        [listen]
        plain = "{addr}"
        "#
    ))
    .expect("valid test config")
}

fn free_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

impl TestServer {
    /// Spawn with default settings.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a config tweak (timeouts, password, opers).
    pub async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let addr = free_port_addr();
        let mut config = base_config(addr);
        tweak(&mut config);

        let db = Db::open(":memory:").await.expect("open credential store");
        let server = Server::new(config, db);
        let task = tokio::spawn(network::run(server.clone()));

        // wait for the listener to come up
        for _ in 0..100 {
            if TcpStream::connect(addr).await.is_ok() {
                return Self { server, addr, task };
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("test server did not start on {addr}");
    }

    /// Stop the server and wait for its tasks.
    pub async fn shutdown(self) {
        self.server.shutdown.cancel();
        let _ = self.task.await;
    }
}
