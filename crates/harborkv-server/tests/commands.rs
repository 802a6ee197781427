mod common;

use common::{in_memory_config, start_server};
use harborkv_client::Client;
use harborkv_proto::Resp;

#[tokio::test]
async fn connection_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    assert_eq!(c.command(&["PING"]).await.unwrap(), Resp::Simple("PONG".into()));
    assert_eq!(c.command(&["PING", "hi"]).await.unwrap(), Resp::bulk("hi"));
    assert_eq!(c.command(&["ECHO", "yo"]).await.unwrap(), Resp::bulk("yo"));
}

#[tokio::test]
async fn unknown_commands_and_subcommands_error() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    let reply = c.command(&["FROBNICATE"]).await.unwrap();
    assert!(matches!(&reply, Resp::Error(t) if t.contains("unknown command")));

    let reply = c.command(&["ACL", "EXPLODE"]).await.unwrap();
    assert!(matches!(&reply, Resp::Error(t) if t.contains("unknown subcommand")));
}

#[tokio::test]
async fn string_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    c.set("s", "hello").await.unwrap();
    assert_eq!(c.command(&["STRLEN", "s"]).await.unwrap(), Resp::Integer(5));
    assert_eq!(
        c.command(&["APPEND", "s", " world"]).await.unwrap(),
        Resp::Integer(11)
    );
    assert_eq!(
        c.command(&["GETRANGE", "s", "0", "4"]).await.unwrap(),
        Resp::bulk("hello")
    );
    assert_eq!(
        c.command(&["GETRANGE", "s", "-5", "-1"]).await.unwrap(),
        Resp::bulk("world")
    );
    assert_eq!(
        c.command(&["SETRANGE", "s", "6", "earth"]).await.unwrap(),
        Resp::Integer(11)
    );
    assert_eq!(c.get("s").await.unwrap().as_deref(), Some("hello earth"));

    assert_eq!(c.command(&["INCR", "n"]).await.unwrap(), Resp::Integer(1));
    assert_eq!(
        c.command(&["INCRBY", "n", "9"]).await.unwrap(),
        Resp::Integer(10)
    );
    assert_eq!(c.command(&["DECR", "n"]).await.unwrap(), Resp::Integer(9));
    assert_eq!(
        c.command(&["DECRBY", "n", "4"]).await.unwrap(),
        Resp::Integer(5)
    );
    let reply = c.command(&["INCR", "s"]).await.unwrap();
    assert!(matches!(&reply, Resp::Error(t) if t.contains("not the right type")));

    c.command(&["MSET", "m1", "a", "m2", "b"]).await.unwrap();
    assert_eq!(
        c.command(&["MGET", "m1", "m2", "missing"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("a"), Resp::bulk("b"), Resp::Null])
    );
}

#[tokio::test]
async fn generic_commands_and_expiry() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    c.set("k1", "v").await.unwrap();
    c.set("k2", "7").await.unwrap();
    assert_eq!(
        c.command(&["TYPE", "k1"]).await.unwrap(),
        Resp::Simple("string".into())
    );
    assert_eq!(
        c.command(&["TYPE", "k2"]).await.unwrap(),
        Resp::Simple("integer".into())
    );
    assert_eq!(
        c.command(&["TYPE", "nope"]).await.unwrap(),
        Resp::Simple("none".into())
    );

    assert_eq!(
        c.command(&["EXISTS", "k1", "k2", "nope"]).await.unwrap(),
        Resp::Integer(2)
    );
    assert_eq!(c.command(&["DBSIZE"]).await.unwrap(), Resp::Integer(2));
    assert_eq!(
        c.command(&["KEYS", "k[12]"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("k1"), Resp::bulk("k2")])
    );

    // TTL lifecycle: none → set → persist.
    assert_eq!(c.command(&["TTL", "k1"]).await.unwrap(), Resp::Integer(-1));
    assert_eq!(c.command(&["TTL", "nope"]).await.unwrap(), Resp::Integer(-2));
    assert_eq!(
        c.command(&["EXPIRE", "k1", "120"]).await.unwrap(),
        Resp::Integer(1)
    );
    let ttl = c.command(&["TTL", "k1"]).await.unwrap();
    assert!(matches!(ttl, Resp::Integer(n) if (1..=120).contains(&n)));
    assert_eq!(
        c.command(&["PERSIST", "k1"]).await.unwrap(),
        Resp::Integer(1)
    );
    assert_eq!(c.command(&["TTL", "k1"]).await.unwrap(), Resp::Integer(-1));

    // Short PEXPIRE actually expires the key.
    assert_eq!(
        c.command(&["PEXPIRE", "k2", "50"]).await.unwrap(),
        Resp::Integer(1)
    );
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(c.get("k2").await.unwrap(), None);

    assert_eq!(c.command(&["DEL", "k1"]).await.unwrap(), Resp::Integer(1));
    assert_eq!(c.command(&["FLUSHALL"]).await.unwrap(), Resp::ok());
    assert_eq!(c.command(&["DBSIZE"]).await.unwrap(), Resp::Integer(0));
}

#[tokio::test]
async fn list_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    assert_eq!(
        c.command(&["RPUSH", "l", "a", "b", "c"]).await.unwrap(),
        Resp::Integer(3)
    );
    assert_eq!(
        c.command(&["LPUSH", "l", "z"]).await.unwrap(),
        Resp::Integer(4)
    );
    assert_eq!(c.command(&["LLEN", "l"]).await.unwrap(), Resp::Integer(4));
    assert_eq!(
        c.command(&["LRANGE", "l", "0", "-1"]).await.unwrap(),
        Resp::Array(vec![
            Resp::bulk("z"),
            Resp::bulk("a"),
            Resp::bulk("b"),
            Resp::bulk("c"),
        ])
    );
    assert_eq!(
        c.command(&["LINDEX", "l", "-1"]).await.unwrap(),
        Resp::bulk("c")
    );
    assert_eq!(c.command(&["LSET", "l", "1", "A"]).await.unwrap(), Resp::ok());
    assert_eq!(c.command(&["LPOP", "l"]).await.unwrap(), Resp::bulk("z"));
    assert_eq!(c.command(&["RPOP", "l"]).await.unwrap(), Resp::bulk("c"));

    let reply = c.command(&["LSET", "l", "9", "x"]).await.unwrap();
    assert!(matches!(&reply, Resp::Error(t) if t.contains("index out of range")));

    // Popping the remaining elements deletes the key.
    c.command(&["LPOP", "l"]).await.unwrap();
    c.command(&["LPOP", "l"]).await.unwrap();
    assert_eq!(
        c.command(&["TYPE", "l"]).await.unwrap(),
        Resp::Simple("none".into())
    );
}

#[tokio::test]
async fn set_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    assert_eq!(
        c.command(&["SADD", "s", "a", "b", "a"]).await.unwrap(),
        Resp::Integer(2)
    );
    assert_eq!(c.command(&["SCARD", "s"]).await.unwrap(), Resp::Integer(2));
    assert_eq!(
        c.command(&["SISMEMBER", "s", "a"]).await.unwrap(),
        Resp::Integer(1)
    );
    assert_eq!(
        c.command(&["SMEMBERS", "s"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("a"), Resp::bulk("b")])
    );
    assert_eq!(
        c.command(&["SREM", "s", "a", "nope"]).await.unwrap(),
        Resp::Integer(1)
    );

    let reply = c.command(&["SADD", "s2", "x"]).await.unwrap();
    assert_eq!(reply, Resp::Integer(1));
    let reply = c.command(&["LPUSH", "s2", "boom"]).await.unwrap();
    assert!(matches!(&reply, Resp::Error(t) if t.contains("not the right type")));
}

#[tokio::test]
async fn hash_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    assert_eq!(
        c.command(&["HSET", "h", "f1", "a", "f2", "b"]).await.unwrap(),
        Resp::Integer(2)
    );
    assert_eq!(
        c.command(&["HGET", "h", "f1"]).await.unwrap(),
        Resp::bulk("a")
    );
    assert_eq!(c.command(&["HGET", "h", "nope"]).await.unwrap(), Resp::Null);
    assert_eq!(
        c.command(&["HEXISTS", "h", "f2"]).await.unwrap(),
        Resp::Integer(1)
    );
    assert_eq!(c.command(&["HLEN", "h"]).await.unwrap(), Resp::Integer(2));
    assert_eq!(
        c.command(&["HGETALL", "h"]).await.unwrap(),
        Resp::Array(vec![
            Resp::bulk("f1"),
            Resp::bulk("a"),
            Resp::bulk("f2"),
            Resp::bulk("b"),
        ])
    );
    assert_eq!(
        c.command(&["HKEYS", "h"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("f1"), Resp::bulk("f2")])
    );
    assert_eq!(
        c.command(&["HVALS", "h"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("a"), Resp::bulk("b")])
    );
    assert_eq!(
        c.command(&["HDEL", "h", "f1", "f2"]).await.unwrap(),
        Resp::Integer(2)
    );
    assert_eq!(
        c.command(&["TYPE", "h"]).await.unwrap(),
        Resp::Simple("none".into())
    );
}

#[tokio::test]
async fn sorted_set_commands() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    assert_eq!(
        c.command(&["ZADD", "z", "2", "b", "1", "a", "3", "c"])
            .await
            .unwrap(),
        Resp::Integer(3)
    );
    // Updating a score is not an addition.
    assert_eq!(
        c.command(&["ZADD", "z", "10", "a"]).await.unwrap(),
        Resp::Integer(0)
    );
    assert_eq!(c.command(&["ZCARD", "z"]).await.unwrap(), Resp::Integer(3));
    assert_eq!(
        c.command(&["ZSCORE", "z", "a"]).await.unwrap(),
        Resp::bulk("10")
    );
    assert_eq!(
        c.command(&["ZRANGE", "z", "0", "-1"]).await.unwrap(),
        Resp::Array(vec![Resp::bulk("b"), Resp::bulk("c"), Resp::bulk("a")])
    );
    assert_eq!(
        c.command(&["ZRANGE", "z", "0", "1", "WITHSCORES"])
            .await
            .unwrap(),
        Resp::Array(vec![
            Resp::bulk("b"),
            Resp::bulk("2"),
            Resp::bulk("c"),
            Resp::bulk("3"),
        ])
    );
    assert_eq!(
        c.command(&["ZREM", "z", "a", "b", "c"]).await.unwrap(),
        Resp::Integer(3)
    );
    assert_eq!(
        c.command(&["TYPE", "z"]).await.unwrap(),
        Resp::Simple("none".into())
    );
}

fn info_field(text: &str, name: &str) -> i64 {
    let prefix = format!("{name}:");
    text.lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .unwrap_or_else(|| panic!("field {name} missing from INFO:\n{text}"))
        .trim()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn info_reports_counters_and_keyspace() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    c.set("k", "v").await.unwrap();
    assert!(c.get("k").await.unwrap().is_some());
    assert!(c.get("missing").await.unwrap().is_none());

    let Resp::Bulk(raw) = c.command(&["INFO"]).await.unwrap() else {
        panic!("expected a bulk INFO reply");
    };
    let text = String::from_utf8(raw.to_vec()).unwrap();
    for section in ["# server", "# memory", "# keyspace", "# stats", "# pubsub"] {
        assert!(text.contains(section), "missing {section} in:\n{text}");
    }
    assert!(text.contains("eviction_policy:noeviction"));
    assert_eq!(info_field(&text, "cluster_enabled"), 0);
    assert_eq!(info_field(&text, "keys"), 1);
    assert_eq!(info_field(&text, "keys_with_expiry"), 0);
    assert!(info_field(&text, "used_memory_bytes") > 0);
    assert_eq!(info_field(&text, "keyspace_hits"), 1);
    assert_eq!(info_field(&text, "keyspace_misses"), 1);
    assert!(info_field(&text, "commands_processed") >= 3);
    assert_eq!(info_field(&text, "active_channels"), 0);
}

#[tokio::test]
async fn subscribe_reply_shapes() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut c = Client::connect(addr).await.unwrap();

    // One channel: a bare simple-string confirmation.
    let reply = c.command(&["SUBSCRIBE", "one"]).await.unwrap();
    assert_eq!(reply, Resp::Simple("subscribe".into()));

    // Several channels: one confirmation frame per channel with the
    // running subscription count.
    let reply = c.command(&["SUBSCRIBE", "two", "three"]).await.unwrap();
    assert_eq!(
        reply,
        Resp::Array(vec![
            Resp::Array(vec![
                Resp::bulk("subscribe"),
                Resp::bulk("two"),
                Resp::Integer(2),
            ]),
            Resp::Array(vec![
                Resp::bulk("subscribe"),
                Resp::bulk("three"),
                Resp::Integer(3),
            ]),
        ])
    );

    let reply = c.command(&["UNSUBSCRIBE", "one"]).await.unwrap();
    assert_eq!(reply, Resp::Simple("unsubscribe".into()));
}
