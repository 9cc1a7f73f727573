use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;

use crate::EventName;
use crate::OperationKind;

/// Raw event frame as delivered by a transport, before any validation.
///
/// The channel-level tag is kept separate from the payload because only
/// SSE carries one; WebSocket frames embed the event name in the payload
/// itself and leave `event` unset.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Channel-provided event-type tag, when the transport has one.
    pub event: Option<String>,
    pub payload: RawPayload,
}

impl RawFrame {
    /// Frame from an SSE `event:`/`data:` pair.
    pub fn sse(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            payload: RawPayload::Text(data.into()),
        }
    }

    /// Frame from a WebSocket text message; the event name lives in the
    /// JSON payload.
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            event: None,
            payload: RawPayload::Text(data.into()),
        }
    }

    /// Frame from an already-decoded JSON object.
    pub fn json(value: Value) -> Self {
        Self {
            event: None,
            payload: RawPayload::Json(value),
        }
    }
}

/// Payload half of a [`RawFrame`]: either the undecoded `data:` text or a
/// JSON value the channel already parsed.
#[derive(Debug, Clone)]
pub enum RawPayload {
    Text(String),
    Json(Value),
}

impl RawPayload {
    /// Decoded size in bytes, used for per-message size accounting.
    pub fn byte_len(&self) -> usize {
        match self {
            RawPayload::Text(text) => text.len(),
            RawPayload::Json(value) => value.to_string().len(),
        }
    }
}

/// JSON payload shape shared by every event on the wire.
///
/// Every field is optional here; which fields an event actually requires
/// is decided by [`OperationEvent::from_parts`], not by serde, so that a
/// malformed payload produces a typed error instead of a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    /// Embedded event name; present on WebSocket frames only. Kept as a
    /// raw string so an unrecognized name is a validation error, not a
    /// decode failure.
    pub event: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<OperationKind>,
    pub file_path: Option<String>,
    pub content: Option<String>,
    pub encoding: Option<String>,
    pub mode: Option<String>,
    pub command: Option<String>,
    pub working_dir: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub timestamp: Option<i64>,
    pub message_id: Option<String>,
    pub operation_id: Option<String>,
}

/// A decoded, shape-checked operation event.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    pub event: EventName,
    pub message_id: String,
    pub operation_id: String,
    pub data: OperationData,
}

/// Tagged union of the two payload families.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationData {
    File(FileOperationData),
    Command(CommandOperationData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOperationData {
    pub kind: OperationKind,
    /// Path as reported by the server; workspace-prefix resolution is the
    /// consumer's concern.
    pub file_path: String,
    /// For progress events this is an incremental delta; for end events
    /// the full final value.
    pub content: String,
    pub encoding: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOperationData {
    pub command: String,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
}

/// Shape violations in an otherwise well-formed JSON payload.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("{event} event is missing filePath")]
    MissingFilePath { event: EventName },
    #[error("cmd event is missing command")]
    MissingCommand,
    #[error("payload type `{found}` does not match event kind `{expected}`")]
    KindMismatch {
        expected: OperationKind,
        found: OperationKind,
    },
}

impl OperationEvent {
    /// Assembles an event from its decoded parts, enforcing the fields the
    /// event name requires.
    ///
    /// An absent `operationId` falls back to the message id, so that
    /// servers emitting single-operation messages without explicit ids
    /// still stream correctly.
    pub fn from_parts(
        event: EventName,
        message_id: impl Into<String>,
        payload: EventPayload,
    ) -> Result<Self, WireError> {
        let expected = event.kind();
        if let Some(found) = payload.kind
            && found != expected
        {
            return Err(WireError::KindMismatch { expected, found });
        }

        let message_id = message_id.into();
        let operation_id = payload
            .operation_id
            .unwrap_or_else(|| message_id.clone());

        let data = match event {
            EventName::Cmd => OperationData::Command(CommandOperationData {
                command: payload.command.ok_or(WireError::MissingCommand)?,
                working_dir: payload.working_dir,
                env: payload.env.unwrap_or_default(),
            }),
            _ => OperationData::File(FileOperationData {
                kind: expected,
                file_path: payload
                    .file_path
                    .ok_or(WireError::MissingFilePath { event })?,
                content: payload.content.unwrap_or_default(),
                encoding: payload.encoding,
                mode: payload.mode,
            }),
        };

        Ok(Self {
            event,
            message_id,
            operation_id,
            data,
        })
    }

    /// Convenience accessor for the file payload, when present.
    pub fn file_data(&self) -> Option<&FileOperationData> {
        match &self.data {
            OperationData::File(data) => Some(data),
            OperationData::Command(_) => None,
        }
    }
}
