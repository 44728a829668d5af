//! Error types for the receiver.
//!
//! Severity depends on where an error surfaces: a malformed JSON header is
//! logged and skipped, while framing and OBJ errors end the session.

use std::io;

pub type Result<T> = std::result::Result<T, ReceiverError>;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// The peer closed the stream in the middle of a frame.
    #[error("short read: expected {expected} bytes, stream closed after {received}")]
    Framing { expected: usize, received: usize },

    /// A declared length is negative or above the configured bound.
    #[error("{field} declares {declared}, allowed range is 0..={limit}")]
    ProtocolLimit {
        field: &'static str,
        declared: i64,
        limit: usize,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Listener setup failed.
    #[error("resource error: {0}")]
    Resource(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session cancelled")]
    Cancelled,

    #[error("ingress already started")]
    AlreadyRunning,

    /// Nobody is draining scene events anymore.
    #[error("scene event sink closed")]
    SinkClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("patient header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mesh {label}: OBJ payload is not valid UTF-8")]
    Utf8 { label: i32 },

    #[error("mesh {label}, line {line}: {reason}")]
    Obj {
        label: i32,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("label {0} is already registered in this session")]
    DuplicateLabel(i32),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("hierarchy rule '{0}' is not of the form CHILD:PARENT")]
    MalformedRule(String),
    #[error("label {0} cannot be its own parent")]
    SelfParent(i32),
    #[error("label {child} has conflicting parents {first} and {second}")]
    ConflictingParents { child: i32, first: i32, second: i32 },
    #[error("hierarchy rules form a cycle through label {0}")]
    Cycle(i32),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("unit scale must be finite and non-zero, got {0}")]
    InvalidScale(f32),
}
