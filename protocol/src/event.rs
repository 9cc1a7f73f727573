use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;
use ts_rs::TS;

/// The closed set of event names a streaming channel may deliver.
///
/// SSE carries the name in the `event:` field; WebSocket frames embed it
/// in the payload. Adding a variant here is a compiler-enforced change:
/// every dispatch site matches exhaustively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, TS,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventName {
    AddStart,
    AddProgress,
    AddEnd,
    EditStart,
    EditProgress,
    EditEnd,
    DeleteStart,
    DeleteProgress,
    DeleteEnd,
    Cmd,
}

impl EventName {
    /// The operation kind this event belongs to.
    pub fn kind(self) -> OperationKind {
        match self {
            EventName::AddStart | EventName::AddProgress | EventName::AddEnd => OperationKind::Add,
            EventName::EditStart | EventName::EditProgress | EventName::EditEnd => {
                OperationKind::Edit
            }
            EventName::DeleteStart | EventName::DeleteProgress | EventName::DeleteEnd => {
                OperationKind::Delete
            }
            EventName::Cmd => OperationKind::Cmd,
        }
    }

    /// The lifecycle phase, if any. Command events are single-shot and
    /// carry no phase.
    pub fn phase(self) -> Option<OperationPhase> {
        match self {
            EventName::AddStart | EventName::EditStart | EventName::DeleteStart => {
                Some(OperationPhase::Start)
            }
            EventName::AddProgress | EventName::EditProgress | EventName::DeleteProgress => {
                Some(OperationPhase::Progress)
            }
            EventName::AddEnd | EventName::EditEnd | EventName::DeleteEnd => {
                Some(OperationPhase::End)
            }
            EventName::Cmd => None,
        }
    }
}

/// Kind of logical operation, as reported in the payload `type` field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, TS,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Add,
    Edit,
    Delete,
    Cmd,
}

/// Lifecycle stage of a file operation: `start` opens it, zero or more
/// `progress` events stream content, `end` closes it with the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TS)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationPhase {
    Start,
    Progress,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn event_names_use_wire_spelling() {
        assert_eq!(EventName::AddStart.to_string(), "add-start");
        assert_eq!(EventName::DeleteProgress.to_string(), "delete-progress");
        assert_eq!(EventName::Cmd.to_string(), "cmd");
        assert_eq!(
            EventName::from_str("edit-end").ok(),
            Some(EventName::EditEnd)
        );
        assert!(EventName::from_str("edit-finish").is_err());
    }

    #[test]
    fn kind_and_phase_cover_all_names() {
        assert_eq!(EventName::EditProgress.kind(), OperationKind::Edit);
        assert_eq!(
            EventName::EditProgress.phase(),
            Some(OperationPhase::Progress)
        );
        assert_eq!(EventName::Cmd.kind(), OperationKind::Cmd);
        assert_eq!(EventName::Cmd.phase(), None);
    }
}
