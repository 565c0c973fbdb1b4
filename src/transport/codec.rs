//! NDJSON codec for stdio transports.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so that
//! an unterminated or maliciously large frame cannot exhaust memory. A
//! partial line at the end of the read buffer is retained until its newline
//! arrives; it is never emitted early.
//!
//! # Usage
//!
//! Use [`LineCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum inbound frame length: 4 MiB.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Newline-delimited JSON codec.
///
/// # Decoder
///
/// Inbound lines longer than [`MAX_LINE_BYTES`], and lines that are not
/// UTF-8, are logged and discarded up to the next newline; decoding then
/// resumes with the following frame.
/// I/O errors are mapped through `From<std::io::Error>`, so "would block"
/// surfaces as [`AppError::WouldBlock`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. Frames containing a raw newline
/// are rejected because they would split into two frames on the wire.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                // Blank keep-alive lines carry no frame.
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(other) => return Ok(other),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = MAX_LINE_BYTES, "stdio codec: discarding oversized frame");
                }
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    warn!(%err, "stdio codec: discarding frame that is not UTF-8");
                }
                Err(err) => return Err(map_codec_error(err)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(other) => return Ok(other),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = MAX_LINE_BYTES, "stdio codec: discarding oversized frame");
                }
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    warn!(%err, "stdio codec: discarding frame that is not UTF-8");
                }
                Err(err) => return Err(map_codec_error(err)),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if `item` contains a raw newline.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        if item.contains('\n') {
            return Err(AppError::Transport(
                "frame contains a raw newline".into(),
            ));
        }
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Parse(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::from(io_err),
    }
}
