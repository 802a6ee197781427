mod common;

use common::{in_memory_config, start_server};
use harborkv_client::Client;
use harborkv_proto::Resp;
use harborkv_server::config::Config;

fn error_text(reply: &Resp) -> &str {
    match reply {
        Resp::Error(text) => text,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn auth_default_user_with_plaintext_password() {
    let cfg = Config {
        require_pass: true,
        password: "password1".to_string(),
        ..in_memory_config()
    };
    let (addr, _server) = start_server(cfg).await;
    let mut client = Client::connect(addr).await.unwrap();

    // Unauthenticated commands are rejected.
    let reply = client.command(&["GET", "k"]).await.unwrap();
    assert!(error_text(&reply).contains("authentication required"));

    let reply = client.command(&["AUTH", "wrong"]).await.unwrap();
    assert!(error_text(&reply).contains("invalid username or password"));

    client.auth("password1").await.unwrap();
    client.set("k", "v").await.unwrap();
    assert_eq!(client.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn disabled_user_cannot_log_in() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut admin = Client::connect(addr).await.unwrap();
    let reply = admin
        .command(&["ACL", "SETUSER", "disabled_user", "off", ">p5"])
        .await
        .unwrap();
    assert_eq!(reply, Resp::Simple("OK".into()));

    let mut client = Client::connect(addr).await.unwrap();
    let reply = client
        .command(&["AUTH", "disabled_user", "p5"])
        .await
        .unwrap();
    assert_eq!(error_text(&reply), "Error user disabled_user is disabled");
}

#[tokio::test]
async fn setuser_key_grants_gate_reads_and_writes() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut admin = Client::connect(addr).await.unwrap();
    admin
        .command(&[
            "ACL", "SETUSER", "u1", "on", "nopass", "~k1", "%R~k2", "%W~k3",
        ])
        .await
        .unwrap();

    let mut client = Client::connect(addr).await.unwrap();
    client.auth_user("u1", "").await.unwrap();

    // Allowed: read k1/k2, write k1/k3.
    assert!(!matches!(
        client.command(&["GET", "k1"]).await.unwrap(),
        Resp::Error(_)
    ));
    assert!(!matches!(
        client.command(&["GET", "k2"]).await.unwrap(),
        Resp::Error(_)
    ));
    client.set("k1", "v").await.unwrap();
    client.set("k3", "v").await.unwrap();

    // Denied: read k3, write k2.
    let reply = client.command(&["GET", "k3"]).await.unwrap();
    assert!(error_text(&reply).contains("access denied"));
    let reply = client.command(&["SET", "k2", "v"]).await.unwrap();
    assert!(error_text(&reply).contains("access denied"));
}

#[tokio::test]
async fn deleting_a_user_drops_its_connections() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut admin = Client::connect(addr).await.unwrap();
    admin
        .command(&["ACL", "SETUSER", "temp", "on", "nopass"])
        .await
        .unwrap();

    let mut client = Client::connect(addr).await.unwrap();
    client.auth_user("temp", "").await.unwrap();

    admin.command(&["ACL", "DELUSER", "temp"]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // The dropped connection errors out on its next round trip.
    let result = client.command(&["PING"]).await;
    assert!(result.is_err() || matches!(result.unwrap(), Resp::Error(_)));
}

#[tokio::test]
async fn whoami_tracks_the_authenticated_user() {
    let (addr, _server) = start_server(in_memory_config()).await;
    let mut admin = Client::connect(addr).await.unwrap();
    admin
        .command(&["ACL", "SETUSER", "u9", "on", "nopass"])
        .await
        .unwrap();

    let mut client = Client::connect(addr).await.unwrap();
    assert_eq!(
        client.command(&["ACL", "WHOAMI"]).await.unwrap(),
        Resp::bulk("default")
    );
    client.auth_user("u9", "").await.unwrap();
    assert_eq!(
        client.command(&["ACL", "WHOAMI"]).await.unwrap(),
        Resp::bulk("u9")
    );
}
