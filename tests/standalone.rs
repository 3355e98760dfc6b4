mod common;

use common::{bind, client, send, spawn_server};
use ferrumring::aof::{AofConfig, SyncPolicy};
use ferrumring::protocol::Reply;
use ferrumring::StandaloneDatabase;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_ping_over_tcp() {
    let (listener, addr) = bind().await;
    let (shutdown, task) = spawn_server(listener, Arc::new(StandaloneDatabase::new(16)));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n");

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_pipelined_commands() {
    let (listener, addr) = bind().await;
    let (shutdown, task) = spawn_server(listener, Arc::new(StandaloneDatabase::new(16)));

    let client = client(addr).await;
    let (a, b, c) = tokio::join!(
        send(&client, &["SET", "a", "1"]),
        send(&client, &["SET", "b", "2"]),
        send(&client, &["EXISTS", "a", "b", "c"]),
    );
    assert_eq!(a, Reply::ok());
    assert_eq!(b, Reply::ok());
    assert_eq!(c, Reply::integer(2));

    let keys = match send(&client, &["KEYS", "*"]).await {
        Reply::MultiBulk(keys) => keys,
        other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(keys.len(), 2);
    assert_eq!(send(&client, &["TYPE", "a"]).await, Reply::status("string"));
    assert_eq!(
        send(&client, &["HSET", "h", "f", "v"]).await,
        Reply::error("ERR unknown command 'hset'")
    );

    client.close().await;
    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_aof_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = AofConfig {
        path: dir.path().join("appendonly.aof"),
        sync_policy: SyncPolicy::Always,
        enabled: true,
    };

    {
        let (listener, addr) = bind().await;
        let db = Arc::new(StandaloneDatabase::open(16, &config).unwrap());
        let (shutdown, task) = spawn_server(listener, db);

        let client = client(addr).await;
        assert_eq!(send(&client, &["SET", "name", "ferrum"]).await, Reply::ok());
        assert_eq!(send(&client, &["SELECT", "5"]).await, Reply::ok());
        assert_eq!(send(&client, &["SET", "name", "five"]).await, Reply::ok());
        assert_eq!(send(&client, &["SETNX", "name", "ignored"]).await, Reply::integer(0));
        client.close().await;

        // serve closes the database, which flushes the AOF
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    let (listener, addr) = bind().await;
    let db = Arc::new(StandaloneDatabase::open(16, &config).unwrap());
    let (shutdown, task) = spawn_server(listener, db);

    let client = client(addr).await;
    assert_eq!(send(&client, &["GET", "name"]).await, Reply::bulk("ferrum"));
    assert_eq!(send(&client, &["SELECT", "5"]).await, Reply::ok());
    assert_eq!(send(&client, &["GET", "name"]).await, Reply::bulk("five"));
    client.close().await;

    shutdown.cancel();
    task.await.unwrap();
}
