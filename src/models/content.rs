//! Prompt content blocks and front-end prompt input.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Where an image block's bytes live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Absolute path on the agent's filesystem.
    File {
        /// Absolute file path.
        path: String,
    },
}

/// One typed block of a `session/prompt` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Text body.
        text: String,
    },
    /// Image passed by reference.
    Image {
        /// Image location.
        source: ImageSource,
    },
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build an image-by-reference block for an absolute path.
    pub fn image_file(path: &Path) -> Self {
        Self::Image {
            source: ImageSource::File {
                path: path.to_string_lossy().into_owned(),
            },
        }
    }
}

/// Extract displayable text from a streamed content value.
///
/// Chunk content is normally `{"type":"text","text":"..."}`; bare strings are
/// accepted as-is and any other shape contributes nothing.
#[must_use]
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        _ => String::new(),
    }
}

/// A user message as handed over by the front-end.
///
/// Attachments are local paths the front-end has already downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptInput {
    /// Message text, if any.
    pub text: Option<String>,
    /// Already-downloaded attachment paths.
    pub attachments: Vec<PathBuf>,
}

impl PromptInput {
    /// Text-only input.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }

    /// Append an attachment path.
    #[must_use]
    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Whether there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(|t| t.trim().is_empty()) && self.attachments.is_empty()
    }

    /// Short description used in log lines.
    #[must_use]
    pub fn preview(&self) -> String {
        let text = self.text.as_deref().unwrap_or_default();
        let head: String = text.chars().take(50).collect();
        if self.attachments.is_empty() {
            head
        } else {
            format!("{head} (+{} attachment(s))", self.attachments.len())
        }
    }

    /// Convert into prompt content blocks.
    ///
    /// Attachments become image-by-reference blocks when the session accepts
    /// images, otherwise a text block naming the absolute path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for empty input and `AppError::Io` if an
    /// attachment path cannot be made absolute.
    pub fn into_blocks(self, image_supported: bool) -> Result<Vec<ContentBlock>> {
        if self.is_empty() {
            return Err(AppError::NotFound("prompt has no text or attachments".into()));
        }

        let mut blocks = Vec::with_capacity(1 + self.attachments.len());
        if let Some(text) = self.text.filter(|t| !t.trim().is_empty()) {
            blocks.push(ContentBlock::text(text));
        }

        for path in self.attachments {
            let absolute = std::path::absolute(&path)?;
            if image_supported {
                blocks.push(ContentBlock::image_file(&absolute));
            } else {
                blocks.push(ContentBlock::text(format!(
                    "[attachment: {}]",
                    absolute.display()
                )));
            }
        }

        Ok(blocks)
    }
}
