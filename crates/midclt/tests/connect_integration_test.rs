//! Connection establishment and authentication against a real peer

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Call, Reply, TestPeer, wait_until};
use midclt::{Client, ClientConfig, ClientError, ConnectionState};
use pretty_assertions::assert_eq;
use serde_json::json;

fn login_responder(call: &Call) -> Reply {
    match (call.method.as_str(), call.params.as_slice()) {
        ("auth.login_with_api_key", [key]) => Reply::Result(json!(key == "1-secret")),
        ("auth.login", [user, password]) => {
            Reply::Result(json!(user == "root" && password == "hunter2"))
        }
        ("core.ping", []) => Reply::Result(json!("pong")),
        _ => Reply::Error(json!({"message": "Not authenticated", "error": 13})),
    }
}

#[tokio::test]
async fn test_api_key_login() {
    let peer = TestPeer::start(login_responder).await;
    let client = Client::connect(peer.config().with_api_key("1-secret"))
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);

    let calls = peer.calls();
    assert_eq!(calls[0].method, "auth.login_with_api_key");
    assert_eq!(calls[0].params, vec![json!("1-secret")]);

    client.close().await;
}

#[tokio::test]
async fn test_password_login() {
    let peer = TestPeer::start(login_responder).await;
    let client = Client::connect(peer.config().with_user_password("root", "hunter2"))
        .await
        .unwrap();

    assert_eq!(peer.calls()[0].method, "auth.login");
    client.close().await;
}

#[tokio::test]
async fn test_api_key_takes_precedence() {
    let peer = TestPeer::start(login_responder).await;
    let config = peer
        .config()
        .with_user_password("root", "wrong")
        .with_api_key("1-secret");
    let client = Client::connect(config).await.unwrap();

    let methods: Vec<String> = peer.calls().into_iter().map(|call| call.method).collect();
    assert_eq!(methods, vec!["auth.login_with_api_key".to_string()]);
    client.close().await;
}

#[tokio::test]
async fn test_rejected_credentials_fail_connect() {
    let peer = TestPeer::start(login_responder).await;
    let err = Client::connect(peer.config().with_user_password("root", "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Auth(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_login_remote_error_is_auth_error() {
    let peer = TestPeer::start(|_: &Call| {
        Reply::Error(json!({"message": "Rate limit exceeded", "error": 16}))
    })
    .await;
    let err = Client::connect(peer.config().with_api_key("1-secret"))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ClientError::Auth(message) if message.contains("Rate limit exceeded")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_no_credentials_skips_login() {
    let peer = TestPeer::start(login_responder).await;
    let client = Client::connect(peer.config()).await.unwrap();
    assert!(peer.calls().is_empty());

    let pong: String = client
        .call(&midclt::CallContext::new(), "core.ping", vec![])
        .await
        .unwrap();
    assert_eq!(pong, "pong");
    client.close().await;
}

#[tokio::test]
async fn test_reconnect_logs_in_again() {
    let peer = TestPeer::start(login_responder).await;
    let client = Client::connect(peer.config().with_api_key("1-secret"))
        .await
        .unwrap();

    peer.drop_connections();
    peer.wait_for_connections(2).await;
    client
        .wait_ready(&midclt::CallContext::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();

    let logins = peer
        .calls()
        .into_iter()
        .filter(|call| call.method == "auth.login_with_api_key")
        .count();
    assert_eq!(logins, 2);
    client.close().await;
}

fn count_logins(peer: &TestPeer) -> usize {
    peer.calls()
        .into_iter()
        .filter(|call| call.method == "auth.login_with_api_key")
        .count()
}

#[tokio::test]
async fn test_connection_lost_during_login_reconnects_promptly() {
    let logins = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&logins);
    let peer = TestPeer::start(move |call: &Call| {
        if call.method == "auth.login_with_api_key"
            && seen.fetch_add(1, Ordering::SeqCst) + 1 == 2
        {
            return Reply::Drop;
        }
        login_responder(call)
    })
    .await;
    let config = peer
        .config()
        .with_api_key("1-secret")
        .with_auth_timeout(Duration::from_secs(30));
    let client = Client::connect(config).await.unwrap();

    peer.drop_connections();
    // far below the login timeout
    tokio::time::timeout(Duration::from_secs(10), async {
        peer.wait_for_connections(3).await;
        wait_until(|| count_logins(&peer) >= 3).await;
        client
            .wait_ready(&midclt::CallContext::with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
    })
    .await
    .unwrap();

    assert_eq!(count_logins(&peer), 3);
    let pong: String = client
        .call(&midclt::CallContext::with_timeout(Duration::from_secs(5)), "core.ping", vec![])
        .await
        .unwrap();
    assert_eq!(pong, "pong");
    client.close().await;
}

#[tokio::test]
async fn test_failed_relogin_returns_to_connecting() {
    let logins = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&logins);
    let peer = TestPeer::start(move |call: &Call| {
        if call.method == "auth.login_with_api_key"
            && seen.fetch_add(1, Ordering::SeqCst) + 1 == 2
        {
            return Reply::Result(json!(false));
        }
        login_responder(call)
    })
    .await;
    let config = peer
        .config()
        .with_api_key("1-secret")
        .with_reconnect_delay(Duration::from_secs(1));
    let client = Client::connect(config).await.unwrap();

    peer.drop_connections();
    wait_until(|| count_logins(&peer) >= 2 && client.state() == ConnectionState::Connecting)
        .await;
    assert!(!client.is_closed());

    peer.wait_for_connections(3).await;
    client
        .wait_ready(&midclt::CallContext::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(count_logins(&peer), 3);
    client.close().await;
}

#[tokio::test]
async fn test_unexpected_disposition_is_handshake_error() {
    let peer = TestPeer::builder()
        .handshake(json!({"msg": "failed", "version": "1"}))
        .start()
        .await;
    let err = Client::connect(peer.config()).await.unwrap_err();
    assert!(matches!(err, ClientError::Handshake(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_empty_session_is_handshake_error() {
    let peer = TestPeer::builder()
        .handshake(json!({"msg": "connected", "session": ""}))
        .start()
        .await;
    let err = Client::connect(peer.config()).await.unwrap_err();
    assert!(matches!(err, ClientError::Handshake(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    // bind then release a port so nothing listens on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(format!("ws://{}/websocket", addr))
        .with_connect_timeout(Duration::from_secs(2));
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_invalid_endpoint_is_config_error() {
    let err = Client::connect(ClientConfig::new("http://127.0.0.1/websocket"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)), "unexpected error: {err}");
}
