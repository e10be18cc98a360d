//! Error types shared across the engine.
//!
//! Almost everything in this crate runs inside long-lived background loops
//! that recover locally, so most of these errors are logged and mapped to a
//! fallback value rather than returned to a user. The exception is
//! [`FrameError`], which signals a caller bug.

use thiserror::Error;

/// A frame was requested outside `0..frame_count`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame index {index} out of range (frame count {frame_count})")]
    IndexOutOfRange { index: i64, frame_count: usize },
}

/// A shaped buffer did not match the active-cell count of the mask.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shaped frame has {actual} cells, mask needs {expected}")]
    Length { expected: usize, actual: usize },

    #[error("pattern row {row} has {actual} cells, mask row needs {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("pattern has {actual} rows, mask needs {expected}")]
    RowCount { expected: usize, actual: usize },

    #[error("unknown pattern glyph {0:?}")]
    Glyph(char),
}

/// The platform media-session layer failed or denied access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("media session access denied: {0}")]
    PermissionDenied(String),

    #[error("media session backend unavailable: {0}")]
    Unavailable(String),

    #[error("no active controller for {0}")]
    NoController(String),
}

/// Binding or unbinding the hardware display service failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("display service bind failed: {0}")]
    Bind(String),

    #[error("display service unbind failed: {0}")]
    Unbind(String),
}

/// The hardware sink rejected a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("display sink closed")]
    Closed,

    #[error("display sink rejected frame: {0}")]
    Rejected(String),
}

/// Reading or writing persisted state failed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
