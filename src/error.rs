//! Unified error handling for the device protocol engine
//!
//! Mirrors the teacher crate's domain-grouped `thiserror` enum: one variant
//! family per failure domain, one `#[error("...")]` message per variant.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Top-level error type for the protocol engine.
#[derive(Error, Debug)]
pub enum DeviceError {
    // Codec errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    // Protocol errors: message well-formed but semantically invalid
    #[error("protocol error: {0}")]
    Protocol(String),

    // Host callback errors: filesystem, pty, socket
    #[error("host callback error: {0}")]
    HostCallback(String),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(String),

    // Internal errors: an unreachable state was reached
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure modes for decoding a wire envelope or typed body.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("truncated input: {0}")]
    Truncated(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("trailing bytes after envelope: {0} byte(s) remaining")]
    TrailingBytes(usize),
}

/// Failure modes for encoding a wire envelope or typed body.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("integer overflow encoding property {field}: {value} does not fit in declared width")]
    Overflow { field: &'static str, value: i64 },

    #[error("write failed: {0}")]
    Io(String),
}

impl DeviceError {
    /// Build a `Protocol` error from a `Display`-able cause.
    pub fn protocol(msg: impl Into<String>) -> Self {
        DeviceError::Protocol(msg.into())
    }

    /// Build a `HostCallback` error from a `Display`-able cause.
    pub fn host_callback(msg: impl Into<String>) -> Self {
        DeviceError::HostCallback(msg.into())
    }

    /// Build a `Transport` error from a `Display`-able cause.
    pub fn transport(msg: impl Into<String>) -> Self {
        DeviceError::Transport(msg.into())
    }

    /// Build an `Internal` error from a `Display`-able cause.
    pub fn internal(msg: impl Into<String>) -> Self {
        DeviceError::Internal(msg.into())
    }
}
