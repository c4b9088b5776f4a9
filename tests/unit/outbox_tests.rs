//! Unit tests for the ordered delivery queue.

use acp_relay::driver::TargetId;
use acp_relay::orchestrator::outbox::Outbox;

use super::test_helpers::{Recorded, RecordingDelivery};

#[tokio::test]
async fn items_are_delivered_in_enqueue_order() {
    let delivery = RecordingDelivery::new();
    let (outbox, _worker) = Outbox::start(delivery.clone());
    let target = TargetId::from("chan");

    outbox.deliver(&target, "one");
    outbox.signal_activity(&target);
    outbox.deliver(&target, "two");
    outbox.barrier().await;

    assert_eq!(
        delivery.events(),
        vec![
            Recorded::Text {
                target: "chan".into(),
                text: "one".into()
            },
            Recorded::Activity {
                target: "chan".into()
            },
            Recorded::Text {
                target: "chan".into(),
                text: "two".into()
            },
        ]
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let delivery = RecordingDelivery::failing(2);
    let (outbox, _worker) = Outbox::start(delivery.clone());

    outbox.deliver(&TargetId::from("chan"), "eventually");
    outbox.barrier().await;

    assert_eq!(delivery.texts(), vec!["eventually"]);
    assert_eq!(delivery.attempts(), 3);
}

#[tokio::test]
async fn persistent_failure_drops_the_unit_and_continues() {
    let delivery = RecordingDelivery::failing(3);
    let (outbox, _worker) = Outbox::start(delivery.clone());
    let target = TargetId::from("chan");

    outbox.deliver(&target, "lost");
    outbox.deliver(&target, "kept");
    outbox.barrier().await;

    assert_eq!(delivery.texts(), vec!["kept"]);
    assert_eq!(delivery.attempts(), 4);
}

#[tokio::test]
async fn worker_exits_when_every_handle_is_dropped() {
    let delivery = RecordingDelivery::new();
    let (outbox, worker) = Outbox::start(delivery.clone());

    outbox.deliver(&TargetId::from("chan"), "last");
    drop(outbox);

    tokio::time::timeout(std::time::Duration::from_secs(2), worker)
        .await
        .expect("worker must exit")
        .unwrap();
    assert_eq!(delivery.texts(), vec!["last"]);
}
