#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use harborkv_server::config::Config;
use harborkv_server::server::Server;
use tokio::net::TcpListener;

/// Boot a server on an ephemeral port and return its address.
pub async fn start_server(cfg: Config) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::build(cfg).await.unwrap();
    tokio::spawn(server.clone().listen(listener));
    (addr, server)
}

/// No persistence, no auth: the default test fixture.
pub fn in_memory_config() -> Config {
    Config {
        in_memory: true,
        ..Config::default()
    }
}
