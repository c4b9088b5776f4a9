//! Unit tests for `AppError` display and classification.

use acp_relay::AppError;

#[test]
fn display_prefixes_name_the_variant() {
    assert_eq!(AppError::Acp("stream closed".into()).to_string(), "acp: stream closed");
    assert_eq!(
        AppError::Timeout("session/prompt (id 4)".into()).to_string(),
        "timeout: session/prompt (id 4)"
    );
    assert_eq!(
        AppError::Remote {
            code: -32602,
            message: "unknown modeId".into()
        }
        .to_string(),
        "remote error -32602: unknown modeId"
    );
}

#[test]
fn messages_have_no_trailing_period() {
    let samples = [
        AppError::ConnectionClosed("agent stream closed".into()),
        AppError::TurnInProgress("session s".into()),
        AppError::QueueClosed("engine stopped".into()),
    ];
    for err in samples {
        assert!(!err.to_string().ends_with('.'), "{err}");
    }
}

#[test]
fn only_dead_stream_and_spawn_failures_are_fatal() {
    assert!(AppError::ConnectionClosed("eof".into()).is_fatal_for_agent());
    assert!(AppError::Spawn("not found".into()).is_fatal_for_agent());

    assert!(!AppError::Timeout("slow".into()).is_fatal_for_agent());
    assert!(!AppError::Remote {
        code: -32000,
        message: "boom".into()
    }
    .is_fatal_for_agent());
    assert!(!AppError::TurnInProgress("busy".into()).is_fatal_for_agent());
}

#[test]
fn io_errors_convert_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn json_errors_convert_to_acp_variant() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(err.to_string().starts_with("acp: json:"));
}
