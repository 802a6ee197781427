mod common;

use common::{in_memory_config, start_server};
use harborkv_client::Client;
use harborkv_proto::Resp;
use tokio::time::{sleep, timeout, Duration};

#[tokio::test]
async fn exact_and_pattern_subscribers_each_receive_one_frame() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let sub_a = Client::connect(addr).await.unwrap();
    let mut sub_a = sub_a.subscribe(&["c1"], false).await.unwrap();

    let sub_b = Client::connect(addr).await.unwrap();
    let mut sub_b = sub_b.subscribe(&["c[123]"], true).await.unwrap();

    let mut publisher = Client::connect(addr).await.unwrap();
    let receivers = publisher.publish("c1", "hello").await.unwrap();
    assert_eq!(receivers, 2);

    let message_a = timeout(Duration::from_secs(2), sub_a.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_a.label, "c1");
    assert_eq!(message_a.payload, "hello");

    let message_b = timeout(Duration::from_secs(2), sub_b.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_b.label, "c[123]");
    assert_eq!(message_b.payload, "hello");

    // Exactly one delivery per subscriber: a fresh publish arrives next,
    // not a duplicate of the first.
    publisher.publish("c1", "second").await.unwrap();
    let message_a = timeout(Duration::from_secs(2), sub_a.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_a.payload, "second");
}

#[tokio::test]
async fn pattern_subscriber_ignores_non_matching_channels() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let sub = Client::connect(addr).await.unwrap();
    let mut sub = sub.subscribe(&["c[123]"], true).await.unwrap();

    let mut publisher = Client::connect(addr).await.unwrap();
    assert_eq!(publisher.publish("c9", "miss").await.unwrap(), 0);
    assert_eq!(publisher.publish("c2", "hit").await.unwrap(), 1);

    let message = timeout(Duration::from_secs(2), sub.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, "hit");
}

#[tokio::test]
async fn per_channel_delivery_is_fifo() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let sub = Client::connect(addr).await.unwrap();
    let mut sub = sub.subscribe(&["queue"], false).await.unwrap();

    let mut publisher = Client::connect(addr).await.unwrap();
    for i in 0..10 {
        publisher
            .publish("queue", &format!("msg-{i}"))
            .await
            .unwrap();
    }
    for i in 0..10 {
        let message = timeout(Duration::from_secs(2), sub.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, format!("msg-{i}"));
    }
}

#[tokio::test]
async fn introspection_counts_subscribers_and_patterns() {
    let (addr, _server) = start_server(in_memory_config()).await;

    let _sub_a = Client::connect(addr)
        .await
        .unwrap()
        .subscribe(&["jobs"], false)
        .await
        .unwrap();
    let _sub_b = Client::connect(addr)
        .await
        .unwrap()
        .subscribe(&["jobs.*"], true)
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut client = Client::connect(addr).await.unwrap();
    assert_eq!(
        client.command(&["PUBSUB", "CHANNELS"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("jobs")])
    );
    assert_eq!(
        client.command(&["PUBSUB", "NUMPAT"]).await.unwrap(),
        Resp::Integer(1)
    );
    assert_eq!(
        client
            .command(&["PUBSUB", "NUMSUB", "jobs", "ghost"])
            .await
            .unwrap(),
        Resp::Array(vec![
            Resp::bulk("jobs"),
            Resp::Integer(1),
            Resp::bulk("ghost"),
            Resp::Integer(0),
        ])
    );
}
