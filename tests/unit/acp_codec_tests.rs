//! Unit tests for the NDJSON codec and the inbound reader task.
//!
//! Covers:
//! - complete, batched, and partial lines
//! - oversized lines are skipped without ending the stream
//! - blank, malformed, and non-JSON-RPC lines
//! - reader dispatch order, replies to agent requests, and close on EOF

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use acp_relay::acp::codec::{AcpCodec, InboundFrame};
use acp_relay::acp::message::RpcMessage;
use acp_relay::acp::reader::{parse_inbound_line, run_reader, InboundSink};
use acp_relay::AppError;

// ── Codec ───────────────────────────────────────────────────────────────────

#[test]
fn single_line_decodes_without_terminator() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"ping\"}\n");

    let frame = codec.decode(&mut buf).expect("decode");
    assert_eq!(frame, Some(InboundFrame::Line("{\"method\":\"ping\"}".into())));
}

#[test]
fn batched_lines_decode_one_at_a_time() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Line("{\"a\":1}".into()))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Line("{\"b\":2}".into()))
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"method\":");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"\"ping\"}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Line("{\"method\":\"ping\"}".into()))
    );
}

#[test]
fn oversized_line_is_reported_and_decoding_resumes() {
    let mut codec = AcpCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\n{\"a\":1}\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(InboundFrame::Oversized));
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Line("{\"a\":1}".into())),
        "the next well-formed line must still decode"
    );
}

#[test]
fn encoder_appends_newline() {
    let mut codec = AcpCodec::new();
    let mut dst = BytesMut::new();
    codec.encode("{\"id\":1}".to_owned(), &mut dst).unwrap();
    assert_eq!(&dst[..], b"{\"id\":1}\n");
}

// ── Line parsing ────────────────────────────────────────────────────────────

#[test]
fn blank_line_is_skipped() {
    assert!(parse_inbound_line("   ").unwrap().is_none());
}

#[test]
fn malformed_json_is_an_acp_error() {
    let err = parse_inbound_line("{not json").unwrap_err();
    assert!(matches!(err, AppError::Acp(ref msg) if msg.starts_with("malformed json")));
}

#[test]
fn json_without_method_or_id_is_rejected() {
    let err = parse_inbound_line("{\"jsonrpc\":\"2.0\"}").unwrap_err();
    assert!(matches!(err, AppError::Acp(_)));
}

#[test]
fn notification_line_is_classified() {
    let message = parse_inbound_line(
        "{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{\"sessionId\":\"s\"}}",
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        message,
        RpcMessage::Notification {
            method: "session/update".into(),
            params: json!({"sessionId": "s"}),
        }
    );
}

// ── Reader task ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<RpcMessage>>,
    closed: Mutex<Option<String>>,
}

impl InboundSink for RecordingSink {
    fn dispatch(&self, message: RpcMessage) -> Option<Value> {
        let reply = match &message {
            RpcMessage::Request { id, .. } => Some(json!({"jsonrpc": "2.0", "id": id, "result": {}})),
            _ => None,
        };
        self.messages.lock().push(message);
        reply
    }

    fn closed(&self, reason: &str) {
        *self.closed.lock() = Some(reason.to_owned());
    }
}

#[tokio::test]
async fn reader_skips_bad_lines_and_reports_eof() {
    let (mut agent_side, relay_side) = tokio::io::duplex(4096);
    let sink = Arc::new(RecordingSink::default());
    let (replies_tx, _replies_rx) = mpsc::channel(8);

    let reader = tokio::spawn(run_reader(
        "test".into(),
        relay_side,
        sink.clone(),
        replies_tx,
        CancellationToken::new(),
    ));

    agent_side
        .write_all(
            concat!(
                "{\"jsonrpc\":\"2.0\",\"method\":\"first\"}\n",
                "garbage\n",
                "\n",
                "{\"jsonrpc\":\"2.0\",\"method\":\"second\"}\n",
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    drop(agent_side);

    tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("reader must stop at EOF")
        .unwrap();

    let methods: Vec<String> = sink
        .messages
        .lock()
        .iter()
        .filter_map(|m| match m {
            RpcMessage::Notification { method, .. } => Some(method.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(methods, vec!["first", "second"]);
    assert_eq!(sink.closed.lock().as_deref(), Some("agent stream closed"));
}

#[tokio::test]
async fn reader_forwards_replies_for_agent_requests() {
    let (mut agent_side, relay_side) = tokio::io::duplex(4096);
    let sink = Arc::new(RecordingSink::default());
    let (replies_tx, mut replies_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let reader = tokio::spawn(run_reader(
        "test".into(),
        relay_side,
        sink.clone(),
        replies_tx,
        cancel.clone(),
    ));

    agent_side
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"session/request_permission\"}\n")
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), replies_rx.recv())
        .await
        .expect("reply within deadline")
        .expect("reply line");
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["id"], json!(7));

    cancel.cancel();
    reader.await.unwrap();
    assert_eq!(sink.closed.lock().as_deref(), Some("transport closed"));
}
