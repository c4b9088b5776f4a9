//! Process shutdown tests: graceful exit, forced kill, and request failure
//! after close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use acp_relay::acp::handshake;
use acp_relay::acp::rpc::RpcClient;
use acp_relay::acp::transport::ShutdownOutcome;
use acp_relay::AppError;

use super::test_helpers::{open_session, script, spawn_config};

#[tokio::test(flavor = "multi_thread")]
async fn cooperative_agent_exits_within_the_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let client =
        RpcClient::start("mock", &spawn_config(dir.path(), &[]), Duration::from_secs(10)).unwrap();
    handshake::initialize(&client).await.unwrap();

    let outcome = client
        .close(Duration::from_secs(2), Duration::from_secs(2))
        .await;

    assert!(matches!(outcome, ShutdownOutcome::Exited(_)), "{outcome:?}");
    assert!(!client.is_alive());
    assert_eq!(
        client
            .close(Duration::from_secs(1), Duration::from_secs(1))
            .await,
        ShutdownOutcome::AlreadyClosed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_ignoring_terminate_is_killed_within_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let client = RpcClient::start(
        "stubborn",
        &spawn_config(dir.path(), &["--ignore-sigterm"]),
        Duration::from_secs(10),
    )
    .unwrap();
    handshake::initialize(&client).await.unwrap();

    let started = Instant::now();
    let outcome = client
        .close(Duration::from_millis(500), Duration::from_secs(1))
        .await;

    assert_eq!(outcome, ShutdownOutcome::Killed);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "close took {:?}",
        started.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_after_close_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let client =
        RpcClient::start("mock", &spawn_config(dir.path(), &[]), Duration::from_secs(10)).unwrap();
    handshake::initialize(&client).await.unwrap();
    client
        .close(Duration::from_secs(1), Duration::from_secs(1))
        .await;

    let err = client
        .request("session/new", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConnectionClosed(_)), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn close_fails_the_outstanding_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let (client, session, _events) =
        open_session(dir.path(), &[], Duration::from_secs(30)).await;
    let session = Arc::new(session);

    let turn = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.prompt(script(&["hang"])).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pending().len(), 1);

    client
        .close(Duration::from_secs(1), Duration::from_secs(1))
        .await;

    let err = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .expect("prompt must fail once the agent is closed")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, AppError::ConnectionClosed(_)), "{err}");
    assert!(client.pending().is_empty());
}
