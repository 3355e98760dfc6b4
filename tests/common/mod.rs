#![allow(dead_code)]

use bytes::Bytes;
use ferrumring::client::{PeerClient, PeerClientConfig};
use ferrumring::database::Database;
use ferrumring::protocol::Reply;
use ferrumring::server;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn line(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
}

pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serve `db` on `listener` until the returned token is cancelled
pub fn spawn_server<D: Database>(listener: TcpListener, db: Arc<D>) -> (CancellationToken, JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move {
        server::serve(listener, db, 64, token).await.unwrap();
    });
    (shutdown, task)
}

pub async fn client(addr: SocketAddr) -> PeerClient {
    PeerClient::connect(addr.to_string(), PeerClientConfig::default())
        .await
        .unwrap()
}

pub async fn send(client: &PeerClient, parts: &[&str]) -> Reply {
    client.send(line(parts)).await
}
