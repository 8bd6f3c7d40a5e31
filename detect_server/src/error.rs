//! Error types of the capture, detection and encoding stages.
//!
use std::time::Duration;

use thiserror::Error;

/// Failure while reading a frame from an open device.
///
/// A capture error ends a streaming session silently, like an end-of-stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to capture frame: {0}")]
    Device(#[from] std::io::Error),
    #[error("failed to decode captured frame: {0}")]
    Decode(String),
}

/// Failure of the detector on a single frame.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },
    #[error("model error: {0}")]
    Model(String),
}

/// Failure to compress an annotated frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode an empty frame")]
    EmptyFrame,
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("codec error: {0}")]
    Codec(String),
}

/// Errors surfaced to the consumer of a streaming session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("no frame produced within {0:?}")]
    Timeout(Duration),
    #[error("streaming worker failed: {0}")]
    Worker(String),
}
