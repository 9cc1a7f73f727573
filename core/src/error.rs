use std::fmt;

use opsync_protocol::EventName;
use opsync_protocol::OperationKind;
use thiserror::Error;

/// Which per-message cap was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Cumulative decoded bytes for the message.
    MessageSize { max: usize },
    /// Distinct operations under one message.
    OperationCount { max: usize },
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::MessageSize { max } => write!(f, "message size cap ({max} bytes)"),
            LimitKind::OperationCount { max } => write!(f, "operation cap ({max})"),
        }
    }
}

/// Everything the parser can report through `on_error`.
///
/// None of these escape `parse()`; a failing frame costs at most that one
/// frame (or, for limit violations, the remainder of one message).
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("failed to decode frame: {reason}")]
    Decode { reason: String },

    #[error("unknown event name `{name}`")]
    UnknownEvent { name: String },

    #[error("message {message_id} exceeded its {limit}")]
    LimitExceeded {
        message_id: String,
        limit: LimitKind,
    },

    #[error("file path `{path}` is not allowed")]
    PathNotAllowed { path: String },

    #[error("command `{command}` is not allowed")]
    CommandNotAllowed { command: String },

    #[error("operation {operation_id} changed kind from {previous} to {requested}")]
    KindMismatch {
        operation_id: String,
        previous: OperationKind,
        requested: OperationKind,
    },

    /// Advisory: the operation went quiet. Nothing is cancelled.
    #[error("operation {operation_id} in message {message_id} timed out")]
    OperationTimeout {
        message_id: String,
        operation_id: String,
    },

    /// A consumer-supplied callback failed. The stream keeps going.
    #[error("handler for {event} failed: {reason}")]
    SideEffect { event: EventName, reason: String },
}
