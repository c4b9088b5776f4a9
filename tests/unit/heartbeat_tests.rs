//! Unit tests for the per-turn heartbeat.

use std::time::Duration;

use acp_relay::driver::TargetId;
use acp_relay::orchestrator::heartbeat::Heartbeat;
use acp_relay::orchestrator::outbox::Outbox;

use super::test_helpers::RecordingDelivery;

#[tokio::test]
async fn first_signal_is_immediate() {
    let delivery = RecordingDelivery::new();
    let (outbox, _worker) = Outbox::start(delivery.clone());

    let handle = Heartbeat::new("a", TargetId::from("chan"), Duration::from_secs(60), outbox.clone())
        .spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop(Duration::from_secs(1)).await;
    outbox.barrier().await;

    assert_eq!(delivery.activity_count(), 1);
}

#[tokio::test]
async fn signals_repeat_until_stopped() {
    let delivery = RecordingDelivery::new();
    let (outbox, _worker) = Outbox::start(delivery.clone());

    let handle = Heartbeat::new("a", TargetId::from("chan"), Duration::from_millis(40), outbox.clone())
        .spawn();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let beats = handle.beats();
    handle.stop(Duration::from_secs(1)).await;
    outbox.barrier().await;

    assert!(beats >= 3, "expected at least 3 beats, got {beats}");
    let after_stop = delivery.activity_count();

    tokio::time::sleep(Duration::from_millis(120)).await;
    outbox.barrier().await;
    assert_eq!(
        delivery.activity_count(),
        after_stop,
        "no signal may be queued after stop returns"
    );
}

#[tokio::test]
async fn dropping_the_handle_stops_the_loop() {
    let delivery = RecordingDelivery::new();
    let (outbox, _worker) = Outbox::start(delivery.clone());

    let handle = Heartbeat::new("a", TargetId::from("chan"), Duration::from_millis(20), outbox.clone())
        .spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(handle);
    tokio::time::sleep(Duration::from_millis(30)).await;
    outbox.barrier().await;
    let settled = delivery.activity_count();

    tokio::time::sleep(Duration::from_millis(100)).await;
    outbox.barrier().await;
    assert_eq!(delivery.activity_count(), settled);
}
