//! # midclt wire format
//!
//! Frame encoding/decoding for the middleware WebSocket protocol. Every
//! protocol message is a single JSON object (a [`Frame`]) carried in one
//! WebSocket text message.
//!
//! ## Usage
//!
//! ```rust
//! use midclt_wire::{Frame, FrameCodec};
//!
//! let codec = FrameCodec::new();
//! let text = codec.encode(&Frame::method_call("1", "system.info", vec![])).unwrap();
//!
//! let reply = codec.decode_str(r#"{"id":"1","result":{"version":"X"}}"#).unwrap();
//! assert_eq!(reply.correlation_id(), Some("1"));
//! # let _ = text;
//! ```
//!
//! Decoding enforces the frame invariant that a reply carries at most one
//! of `result` and `error`.

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod frame;

pub use frame::{Disposition, Frame, PROTOCOL_VERSION, RemoteErrorPayload};
pub use serde_json::Value;

use thiserror::Error;

/// Wire format codec error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The frame could not be serialized
    #[error("encode: {0}")]
    Encode(String),

    /// The bytes were not a JSON object of the frame shape
    #[error("decode: {0}")]
    Decode(String),

    /// The frame parsed but violates a frame invariant
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// JSON codec for [`Frame`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    /// Pretty print output (default: false)
    pub pretty: bool,
}

impl FrameCodec {
    /// Create a new codec producing compact JSON
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with pretty printing enabled
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Encode a frame to JSON text
    pub fn encode(&self, frame: &Frame) -> CodecResult<String> {
        validate(frame)?;
        if self.pretty {
            serde_json::to_string_pretty(frame)
        } else {
            serde_json::to_string(frame)
        }
        .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a frame from raw bytes (text or binary WebSocket payloads)
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Frame> {
        let frame: Frame =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        normalize(frame)
    }

    /// Decode a frame from JSON text
    pub fn decode_str(&self, text: &str) -> CodecResult<Frame> {
        self.decode(text.as_bytes())
    }
}

fn validate(frame: &Frame) -> CodecResult<()> {
    if frame.error.is_some() && frame.result.is_some() {
        return Err(CodecError::InvalidFrame(
            "frame carries both result and error".to_string(),
        ));
    }
    Ok(())
}

// A `"result": null` next to an error is how some servers spell "no result".
fn normalize(mut frame: Frame) -> CodecResult<Frame> {
    if frame.error.is_some() && frame.result == Some(Value::Null) {
        frame.result = None;
    }
    validate(&frame)?;
    Ok(frame)
}
