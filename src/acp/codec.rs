//! NDJSON codec for ACP agent streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized message from a misbehaving agent cannot exhaust
//! memory.
//!
//! An oversized line is surfaced as [`InboundFrame::Oversized`] rather than a
//! decoder error: `FramedRead` ends the stream after the first decoder error,
//! which would turn one bad line into a dead agent. `LinesCodec` discards the
//! rest of the offending line on its own, so decoding resumes at the next
//! newline.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the ACP codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A complete UTF-8 line without its terminator.
    Line(String),
    /// A line exceeded [`MAX_LINE_BYTES`] and was discarded.
    Oversized,
}

/// NDJSON codec for bidirectional ACP agent streams.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use acp_relay::acp::codec::AcpCodec;
///
/// let reader = FramedRead::new(child_stdout, AcpCodec::new());
/// ```
#[derive(Debug)]
pub struct AcpCodec(LinesCodec);

impl AcpCodec {
    /// Create a new `AcpCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = InboundFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        frame(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        frame(self.0.decode_eof(src))
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line. The length limit applies only
    /// to decoding.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Acp("outbound line exceeds limit".into())
            }
        })
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn frame(
    decoded: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<InboundFrame>> {
    match decoded {
        Ok(line) => Ok(line.map(InboundFrame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InboundFrame::Oversized)),
        Err(LinesCodecError::Io(io_err)) => Err(AppError::Io(io_err.to_string())),
    }
}
