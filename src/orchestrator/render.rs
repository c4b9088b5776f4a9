//! Text formatting for tool events, errors, and oversized replies.

use serde_json::Value;

use crate::models::update::{ToolCall, ToolCallUpdate};
use crate::AppError;

/// Shown after a turn that ended with `cancelled`.
pub const CANCELLED_NOTICE: &str = "⏹ Cancelled";

/// Format a tool invocation: title, optional purpose, optional command.
#[must_use]
pub fn render_tool_call(call: &ToolCall) -> String {
    let title = if call.title.is_empty() {
        "unknown"
    } else {
        call.title.as_str()
    };

    let mut parts = vec![format!("🔧 {title}")];
    if let Some(purpose) = call.purpose() {
        parts.push(format!("_{purpose}_"));
    }
    if let Some(command) = call.command().filter(|c| !title.contains(c)) {
        parts.push(format!("`{command}`"));
    }
    parts.join("\n")
}

/// Format the output of a completed tool, or `None` if there is nothing to show.
#[must_use]
pub fn render_tool_output(update: &ToolCallUpdate, excerpt: usize) -> Option<String> {
    if !update.is_completed() {
        return None;
    }
    let output = update.output()?;

    let mut parts = Vec::new();
    if !output.stdout.is_empty() {
        parts.push(format!(
            "**Output:**\n```\n{}\n```",
            truncate_middle(&output.stdout, excerpt)
        ));
    }
    if !output.stderr.is_empty() {
        parts.push(format!(
            "**stderr:**\n```\n{}\n```",
            truncate_middle(&output.stderr, excerpt)
        ));
    }
    Some(parts.join("\n"))
}

/// Keep the first and last `keep` characters of `text`.
#[must_use]
pub fn truncate_middle(text: &str, keep: usize) -> String {
    let total = text.chars().count();
    if total <= keep.saturating_mul(2) {
        return text.to_owned();
    }
    let head: String = text.chars().take(keep).collect();
    let tail: String = text.chars().skip(total - keep).collect();
    format!(
        "{head}\n\n... (truncated {} characters) ...\n\n{tail}",
        total - keep * 2
    )
}

/// Split `text` into pieces of at most `limit` characters.
///
/// Cuts at the last newline inside each window when there is one, otherwise
/// at the character limit. Newlines at a cut are dropped.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        // Byte offset of the `limit`-th character.
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(offset, _)| offset);
        let window = &rest[..window_end];

        match window.rfind('\n').filter(|&at| at > 0) {
            Some(at) => {
                pieces.push(window[..at].to_owned());
                rest = &rest[at + 1..];
            }
            None => {
                pieces.push(window.to_owned());
                rest = &rest[window_end..];
            }
        }
    }

    if !rest.is_empty() || pieces.is_empty() {
        pieces.push(rest.to_owned());
    }
    pieces
}

/// User-facing form of an engine error.
#[must_use]
pub fn render_error(err: &AppError) -> String {
    match err {
        AppError::Remote { message, .. } => format!("❌ Error: {message}"),
        other => format!("❌ Error: {other}"),
    }
}

/// Short notice for a context-compaction status event.
#[must_use]
pub fn render_compaction(params: &Value) -> Option<String> {
    let status = params.get("status")?;
    let label = status
        .as_str()
        .or_else(|| status.get("type").and_then(Value::as_str))?;
    Some(format!("🗜 Context compaction: {label}"))
}
