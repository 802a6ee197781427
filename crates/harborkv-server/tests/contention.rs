mod common;

use common::{in_memory_config, start_server};
use harborkv_client::Client;
use harborkv_proto::Resp;

/// Two concurrent SETRANGEs on the same key linearize under the per-key
/// write lock: the result is one of the two serial outcomes, never a torn
/// string.
#[tokio::test]
async fn concurrent_setrange_is_never_torn() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let mut seed = Client::connect(addr).await.unwrap();
    seed.set("k", "seed").await.unwrap();

    let writer_a = tokio::spawn(async move {
        let mut client = Client::connect(addr).await.unwrap();
        client.command(&["SETRANGE", "k", "0", "aaaa"]).await.unwrap()
    });
    let writer_b = tokio::spawn(async move {
        let mut client = Client::connect(addr).await.unwrap();
        client.command(&["SETRANGE", "k", "2", "bbbb"]).await.unwrap()
    });
    let reply_a = writer_a.await.unwrap();
    let reply_b = writer_b.await.unwrap();
    assert!(!matches!(reply_a, Resp::Error(_)), "{reply_a:?}");
    assert!(!matches!(reply_b, Resp::Error(_)), "{reply_b:?}");

    let value = seed.get("k").await.unwrap().unwrap();
    assert_eq!(value.len(), 6);
    assert!(
        value == "aabbbb" || value == "aaaabb",
        "torn value: {value:?}"
    );

    let reply = seed.command(&["STRLEN", "k"]).await.unwrap();
    assert_eq!(reply, Resp::Integer(6));
}

/// Concurrent INCRs from many connections never lose an update.
#[tokio::test]
async fn concurrent_incr_counts_every_update() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await.unwrap();
            for _ in 0..25 {
                let reply = client.command(&["INCR", "counter"]).await.unwrap();
                assert!(!matches!(reply, Resp::Error(_)), "{reply:?}");
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = Client::connect(addr).await.unwrap();
    assert_eq!(
        client.get("counter").await.unwrap().as_deref(),
        Some("200")
    );
}
