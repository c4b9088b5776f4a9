//! Engine-level tests: dispatcher, registry, coalescer, and heartbeat driven
//! through the scripted mock agent.

use std::time::Duration;

use acp_relay::models::content::PromptInput;
use acp_relay::models::session::{SessionId, StopReason};
use acp_relay::orchestrator::render::CANCELLED_NOTICE;
use acp_relay::AppError;

use super::test_helpers::{mock_config, script_input, start_engine, target, Recorded};

#[tokio::test(flavor = "multi_thread")]
async fn chunks_inside_the_window_are_delivered_as_one_unit() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    let stop = dispatcher
        .prompt(None, script_input(&["chunk Hello, ", "sleep 500", "chunk world."]))
        .await
        .unwrap();
    dispatcher.settle().await;

    assert_eq!(stop, StopReason::EndTurn);
    assert_eq!(delivery.texts(), vec!["Hello, world."]);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn delivery_order_matches_emission_order() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    dispatcher
        .prompt(
            None,
            script_input(&["chunk Before", "tool ls -la", "tool_done file.txt", "chunk After"]),
        )
        .await
        .unwrap();
    dispatcher.settle().await;

    let texts = delivery.texts();
    assert_eq!(texts.len(), 4, "{texts:?}");
    assert_eq!(texts[0], "Before");
    assert!(texts[1].starts_with("🔧") && texts[1].contains("ls -la"), "{texts:?}");
    assert!(texts[2].contains("file.txt"), "{texts:?}");
    assert_eq!(texts[3], "After");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_runs_only_while_the_turn_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = mock_config(dir.path(), &[]);
    config.output.heartbeat_interval_ms = 100;
    let (dispatcher, _runtime, delivery) = start_engine(config);
    dispatcher.switch_agent("main", target()).await.unwrap();

    dispatcher
        .prompt(None, script_input(&["sleep 450", "chunk done"]))
        .await
        .unwrap();
    dispatcher.settle().await;

    assert!(delivery.activity_count() >= 3, "{:?}", delivery.events());
    assert_eq!(
        delivery.events().last(),
        Some(&Recorded::Text("done".into())),
        "no activity signal may follow the final output"
    );
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_error_is_reported_and_the_next_prompt_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    let err = dispatcher
        .prompt(None, script_input(&["chunk partial", "error -32000 boom"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Remote { code: -32000, .. }), "{err}");

    let stop = dispatcher
        .prompt(None, script_input(&["chunk fine"]))
        .await
        .unwrap();
    dispatcher.settle().await;

    assert_eq!(stop, StopReason::EndTurn);
    assert_eq!(delivery.texts(), vec!["partial", "❌ Error: boom", "fine"]);
    assert!(dispatcher.describe(None).await.unwrap().fault.is_none());
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_starts_a_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    let first = dispatcher.switch_agent("main", target()).await.unwrap();

    let second = dispatcher.restart(None).await.unwrap();

    assert_ne!(first, second);
    let status = dispatcher.describe(Some("main")).await.unwrap();
    assert_eq!(status.session_id, Some(second));
    assert_eq!(status.pending_requests, 0);
    assert!(!status.turn_active);
    assert!(status.active);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_recovers_an_agent_stuck_in_a_turn() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    let first = dispatcher.switch_agent("main", target()).await.unwrap();

    let stuck = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.prompt(None, script_input(&["chunk partial", "hang"])).await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = tokio::time::timeout(Duration::from_secs(10), dispatcher.restart(None))
        .await
        .expect("restart must not wait for the hung turn")
        .unwrap();
    assert_ne!(first, second);

    let err = stuck.await.unwrap().unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)), "{err}");

    let stop = dispatcher
        .prompt(None, script_input(&["chunk alive"]))
        .await
        .unwrap();
    assert_eq!(stop, StopReason::EndTurn);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn restarting_the_active_agent_leaves_another_agents_turn_running() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.start_session("beta", None, target()).await.unwrap();
    let first = dispatcher.switch_agent("alpha", target()).await.unwrap();

    let beta_turn = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .prompt(Some("beta"), script_input(&["sleep 1500", "chunk beta done"]))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = dispatcher.restart(None).await.unwrap();
    assert_ne!(first, second);

    let stop = beta_turn.await.unwrap().unwrap();
    assert_eq!(stop, StopReason::EndTurn);
    let alpha = dispatcher.describe(None).await.unwrap();
    assert_eq!(alpha.name, "alpha");
    assert_eq!(alpha.session_id, Some(second));
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_the_active_agent_leaves_another_agents_turn_running() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.start_session("beta", None, target()).await.unwrap();
    dispatcher.switch_agent("alpha", target()).await.unwrap();

    let beta_turn = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .prompt(Some("beta"), script_input(&["sleep 1000", "chunk beta done"]))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    dispatcher.cancel(None).await.unwrap();

    let stop = beta_turn.await.unwrap().unwrap();
    dispatcher.settle().await;
    assert_eq!(stop, StopReason::EndTurn);
    assert_eq!(delivery.texts(), vec!["beta done"]);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_reaches_the_running_turn() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    let turn = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .prompt(None, script_input(&["chunk working", "sleep 10000"]))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    dispatcher.cancel(None).await.unwrap();
    let stop = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn must end after cancel")
        .unwrap()
        .unwrap();
    dispatcher.settle().await;

    assert_eq!(stop, StopReason::Cancelled);
    assert_eq!(delivery.texts(), vec!["working", CANCELLED_NOTICE]);

    dispatcher.cancel(None).await.expect("second cancel is a no-op");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_without_any_agent_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));

    dispatcher.cancel(None).await.unwrap();
    dispatcher.settle().await;

    assert!(delivery.events().is_empty());
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn prompts_run_one_at_a_time_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    let first = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .prompt(None, script_input(&["sleep 300", "chunk first"]))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = dispatcher
        .prompt(None, script_input(&["chunk second"]))
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), StopReason::EndTurn);
    assert_eq!(second, StopReason::EndTurn);
    dispatcher.settle().await;
    assert_eq!(delivery.texts(), vec!["first", "second"]);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_agent_is_unavailable_until_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    let err = dispatcher
        .prompt(None, script_input(&["exit 2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConnectionClosed(_)), "{err}");

    let status = dispatcher.describe(None).await.unwrap();
    assert!(status.fault.is_some());
    assert!(status.session_id.is_none());

    let err = dispatcher
        .prompt(None, script_input(&["chunk hello"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)), "{err}");

    dispatcher.restart(None).await.unwrap();
    let stop = dispatcher
        .prompt(None, script_input(&["chunk hello"]))
        .await
        .unwrap();
    assert_eq!(stop, StopReason::EndTurn);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn agents_are_listed_switched_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));

    let alpha = dispatcher.switch_agent("alpha", target()).await.unwrap();
    dispatcher.switch_agent("beta", target()).await.unwrap();

    let agents = dispatcher.list_agents().await.unwrap();
    let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert!(!agents[0].active && agents[1].active);

    let again = dispatcher.switch_agent("alpha", target()).await.unwrap();
    assert_eq!(again, alpha, "switching back reuses the live session");

    dispatcher.delete_agent("beta").await.unwrap();
    assert_eq!(dispatcher.list_agents().await.unwrap().len(), 1);

    let err = dispatcher.delete_agent("beta").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{err}");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mode_and_model_changes_show_in_status() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    dispatcher.set_mode(None, "plan").await.unwrap();
    dispatcher.set_model(None, "mock-large").await.unwrap();

    let status = dispatcher.describe(None).await.unwrap();
    assert_eq!(status.modes.unwrap().current_mode_id, "plan");
    assert_eq!(status.models.unwrap().current_model_id, "mock-large");

    let err = dispatcher.set_mode(None, "bogus").await.unwrap_err();
    assert!(matches!(err, AppError::Remote { .. }), "{err}");
    assert!(dispatcher.describe(None).await.unwrap().fault.is_none());
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn load_session_restores_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));

    let restored = dispatcher
        .load_session("main", SessionId::from("persisted-7"), target())
        .await
        .unwrap();
    assert_eq!(restored.as_str(), "persisted-7");

    let err = dispatcher
        .load_session("main", SessionId::from("persisted-8"), target())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "{err}");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn attachments_fall_back_to_paths_without_image_support() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("shot.png");
    std::fs::write(&image, b"not really a png").unwrap();
    let (dispatcher, _runtime, delivery) =
        start_engine(mock_config(dir.path(), &["--no-images"]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    dispatcher
        .prompt(None, PromptInput::text("chunk look").with_attachment(&image))
        .await
        .unwrap();
    dispatcher.settle().await;

    let texts = delivery.texts();
    assert_eq!(texts.len(), 1, "{texts:?}");
    assert!(texts[0].starts_with("look"), "{texts:?}");
    assert!(texts[0].contains("shot.png"), "{texts:?}");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn prompt_without_an_active_agent_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, _runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));

    let err = dispatcher
        .prompt(None, script_input(&["chunk hi"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)), "{err}");
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let (dispatcher, runtime, _delivery) = start_engine(mock_config(dir.path(), &[]));
    dispatcher.switch_agent("main", target()).await.unwrap();

    dispatcher.shutdown().await.unwrap();

    let err = dispatcher
        .prompt(None, script_input(&["chunk late"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QueueClosed(_)), "{err}");

    tokio::time::timeout(Duration::from_secs(5), runtime.worker)
        .await
        .expect("worker must exit after shutdown")
        .unwrap();
}
