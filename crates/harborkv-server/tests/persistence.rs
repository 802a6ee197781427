mod common;

use common::start_server;
use harborkv_client::Client;
use harborkv_proto::Resp;
use harborkv_server::config::{AofSyncStrategy, Config};
use tokio::time::{sleep, Duration};

fn durable_config(dir: &tempfile::TempDir) -> Config {
    Config {
        data_dir: dir.path().to_string_lossy().to_string(),
        aof_sync_strategy: AofSyncStrategy::Always,
        ..Config::default()
    }
}

#[tokio::test]
async fn aof_restore_replays_the_log() {
    let dir = tempfile::tempdir().unwrap();

    let (addr, _server) = start_server(durable_config(&dir)).await;
    let mut client = Client::connect(addr).await.unwrap();
    client.set("a", "1").await.unwrap();
    client.set("b", "2").await.unwrap();
    client.command(&["APPEND", "a", "x"]).await.unwrap();
    // Let the writer drain the queue before "restarting".
    sleep(Duration::from_millis(300)).await;

    let cfg = Config {
        restore_aof: true,
        ..durable_config(&dir)
    };
    let (addr2, _server2) = start_server(cfg).await;
    let mut client2 = Client::connect(addr2).await.unwrap();
    assert_eq!(client2.get("a").await.unwrap().as_deref(), Some("1x"));
    assert_eq!(client2.get("b").await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn aof_rewrite_compacts_and_preserves_state() {
    let dir = tempfile::tempdir().unwrap();

    let (addr, _server) = start_server(durable_config(&dir)).await;
    let mut client = Client::connect(addr).await.unwrap();
    for i in 0..20 {
        client.set(&format!("key{i}"), &format!("v{i}")).await.unwrap();
    }
    sleep(Duration::from_millis(300)).await;

    let reply = client.command(&["BGREWRITEAOF"]).await.unwrap();
    assert_eq!(
        reply,
        Resp::Simple("Background append only file rewriting started".into())
    );
    sleep(Duration::from_millis(500)).await;

    // The log shrank to (near) nothing; the state moved into the snapshot.
    let log_len = std::fs::metadata(dir.path().join("aof/log.aof"))
        .unwrap()
        .len();
    assert_eq!(log_len, 0);
    assert!(dir.path().join("aof/snapshot.bin").exists());

    let cfg = Config {
        restore_aof: true,
        ..durable_config(&dir)
    };
    let (addr2, _server2) = start_server(cfg).await;
    let mut client2 = Client::connect(addr2).await.unwrap();
    for i in 0..20 {
        assert_eq!(
            client2.get(&format!("key{i}")).await.unwrap().as_deref(),
            Some(format!("v{i}").as_str()),
        );
    }
}

#[tokio::test]
async fn save_and_snapshot_restore_roundtrip() {
    let dir = tempfile::tempdir().unwrap();

    let (addr, _server) = start_server(durable_config(&dir)).await;
    let mut client = Client::connect(addr).await.unwrap();
    client.set("alpha", "1").await.unwrap();
    client.command(&["LPUSH", "queue", "x", "y"]).await.unwrap();
    assert_eq!(client.command(&["SAVE"]).await.unwrap(), Resp::ok());

    let last_save = client.command(&["LASTSAVE"]).await.unwrap();
    assert!(matches!(last_save, Resp::Integer(n) if n > 0));

    let cfg = Config {
        restore_snapshot: true,
        ..durable_config(&dir)
    };
    let (addr2, _server2) = start_server(cfg).await;
    let mut client2 = Client::connect(addr2).await.unwrap();
    assert_eq!(client2.get("alpha").await.unwrap().as_deref(), Some("1"));
    assert_eq!(
        client2.command(&["LRANGE", "queue", "0", "-1"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("y"), Resp::bulk("x")])
    );
}
