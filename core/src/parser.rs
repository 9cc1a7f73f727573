use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use opsync_protocol::EventName;
use opsync_protocol::EventPayload;
use opsync_protocol::OperationData;
use opsync_protocol::OperationEvent;
use opsync_protocol::OperationKind;
use opsync_protocol::OperationPhase;
use opsync_protocol::RawFrame;
use opsync_protocol::RawPayload;
use opsync_protocol::WireError;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::error::LimitKind;
use crate::error::ParseError;
use crate::handler::OperationContext;
use crate::handler::OperationHandler;

/// SSE channels report this tag when the server omits an `event:` field.
const DEFAULT_SSE_EVENT: &str = "message";

const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_OPERATIONS: usize = 100;
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_TRACKED_MESSAGES: usize = 256;

/// Tunables for [`OperationParser`].
///
/// Path lists match by prefix; command lists match the full command
/// string or its first whitespace-separated token (the program word).
/// Empty allow lists admit everything; block lists always win.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub enable_validation: bool,
    /// Cumulative decoded bytes permitted per message.
    pub max_message_size: usize,
    /// Distinct operations permitted per message.
    pub max_operations_per_message: usize,
    /// Advisory staleness threshold for [`OperationParser::sweep_stale`].
    pub operation_timeout: Duration,
    /// Messages tracked before the least-recently-touched one is evicted.
    pub max_tracked_messages: usize,
    pub allowed_file_paths: Vec<String>,
    pub blocked_file_paths: Vec<String>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            enable_validation: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_operations_per_message: DEFAULT_MAX_OPERATIONS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_tracked_messages: DEFAULT_MAX_TRACKED_MESSAGES,
            allowed_file_paths: Vec::new(),
            blocked_file_paths: Vec::new(),
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
        }
    }
}

/// Anomaly counters. These never gate processing; they exist so a host
/// can notice a misbehaving stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParserStats {
    /// Progress events that arrived after their operation ended.
    pub progress_after_end: u64,
    /// Operations whose first observed event was not `-start`.
    pub synthesized_operations: u64,
    /// Events dropped because their message already tripped a limit.
    pub dropped_after_limit: u64,
    /// Message states discarded by the tracking cap.
    pub evicted_messages: u64,
}

#[derive(Debug)]
struct OperationState {
    kind: OperationKind,
    phase: Option<OperationPhase>,
    last_event_at: Instant,
    accumulated_bytes: usize,
    synthesized: bool,
    ended: bool,
    timed_out: bool,
}

#[derive(Debug)]
struct MessageState {
    total_bytes: usize,
    operations: IndexMap<String, OperationState>,
    limit_tripped: bool,
}

impl MessageState {
    fn new() -> Self {
        Self {
            total_bytes: 0,
            operations: IndexMap::new(),
            limit_tripped: false,
        }
    }
}

/// Read-only view of one tracked message, for debugging and tests.
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub message_id: String,
    pub total_bytes: usize,
    pub limit_tripped: bool,
    pub operations: Vec<OperationSnapshot>,
}

impl MessageSnapshot {
    pub fn operation(&self, operation_id: &str) -> Option<&OperationSnapshot> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

#[derive(Debug, Clone)]
pub struct OperationSnapshot {
    pub operation_id: String,
    pub kind: OperationKind,
    pub phase: Option<OperationPhase>,
    pub accumulated_bytes: usize,
    pub synthesized: bool,
    pub ended: bool,
    pub timed_out: bool,
}

/// Decodes raw frames into typed operation events, tracks per-message and
/// per-operation state, and invokes exactly one handler callback per
/// accepted event, in arrival order.
///
/// Errors never escape [`OperationParser::parse`]; they flow through
/// [`OperationHandler::on_error`]. Phase ordering is deliberately not
/// enforced: a stream joined mid-operation after a reconnect must still
/// apply cleanly, so `-end` without `-start` synthesizes state and
/// `-progress` after `-end` is dispatched and counted as an anomaly.
pub struct OperationParser {
    config: ParserConfig,
    handler: Arc<dyn OperationHandler>,
    messages: IndexMap<String, MessageState>,
    stats: ParserStats,
}

impl OperationParser {
    pub fn new(config: ParserConfig, handler: Arc<dyn OperationHandler>) -> Self {
        Self {
            config,
            handler,
            messages: IndexMap::new(),
            stats: ParserStats::default(),
        }
    }

    /// Parses one frame under an explicit message id. The id in the
    /// payload, if any, is ignored; the caller's id is authoritative.
    pub async fn parse(&mut self, message_id: &str, frame: RawFrame) {
        let Some((payload, byte_len)) = self.decode_reported(&frame) else {
            return;
        };
        self.process(message_id.to_string(), payload, byte_len, &frame)
            .await;
    }

    /// Parses one frame, taking the message id from the payload and
    /// falling back to `fallback_message_id` when the payload has none.
    pub async fn parse_frame(&mut self, frame: RawFrame, fallback_message_id: Option<&str>) {
        let Some((payload, byte_len)) = self.decode_reported(&frame) else {
            return;
        };
        let message_id = payload
            .message_id
            .clone()
            .or_else(|| fallback_message_id.map(str::to_string));
        let Some(message_id) = message_id else {
            self.report(
                ParseError::Decode {
                    reason: "frame carries no messageId".to_string(),
                },
                Some(&frame),
            );
            return;
        };
        self.process(message_id, payload, byte_len, &frame).await;
    }

    /// Drops all tracked message state. Call at conversation boundaries.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Drops one message's state once its terminal events are applied or
    /// the message left UI history.
    pub fn clear_message(&mut self, message_id: &str) {
        self.messages.shift_remove(message_id);
    }

    pub fn get_message_state(&self, message_id: &str) -> Option<MessageSnapshot> {
        self.messages.get(message_id).map(|msg| MessageSnapshot {
            message_id: message_id.to_string(),
            total_bytes: msg.total_bytes,
            limit_tripped: msg.limit_tripped,
            operations: msg
                .operations
                .iter()
                .map(|(operation_id, op)| OperationSnapshot {
                    operation_id: operation_id.clone(),
                    kind: op.kind,
                    phase: op.phase,
                    accumulated_bytes: op.accumulated_bytes,
                    synthesized: op.synthesized,
                    ended: op.ended,
                    timed_out: op.timed_out,
                })
                .collect(),
        })
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Marks operations idle past `operation_timeout` as failed and
    /// reports each once. Advisory only: nothing is cancelled and any
    /// already-applied side effects stand.
    pub fn sweep_stale(&mut self) {
        let timeout = self.config.operation_timeout;
        let now = Instant::now();
        let mut expired: Vec<(String, String)> = Vec::new();
        for (message_id, msg) in &mut self.messages {
            for (operation_id, op) in &mut msg.operations {
                if !op.ended
                    && !op.timed_out
                    && now.duration_since(op.last_event_at) >= timeout
                {
                    op.timed_out = true;
                    expired.push((message_id.clone(), operation_id.clone()));
                }
            }
        }
        for (message_id, operation_id) in expired {
            self.report(
                ParseError::OperationTimeout {
                    message_id,
                    operation_id,
                },
                None,
            );
        }
    }

    fn decode_reported(&self, frame: &RawFrame) -> Option<(EventPayload, usize)> {
        match decode(frame) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                self.report(err, Some(frame));
                None
            }
        }
    }

    async fn process(
        &mut self,
        message_id: String,
        payload: EventPayload,
        byte_len: usize,
        frame: &RawFrame,
    ) {
        let event = match self.resolve_event_name(frame, &payload) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(err) => {
                self.report(err, Some(frame));
                return;
            }
        };

        // A message that tripped a limit already reported its one error;
        // everything further for it is dropped without another word.
        if let Some(msg) = self.messages.get(&message_id)
            && msg.limit_tripped
        {
            self.stats.dropped_after_limit += 1;
            trace!("dropping event for limited message {message_id}");
            return;
        }

        let operation_id = payload
            .operation_id
            .clone()
            .unwrap_or_else(|| message_id.clone());
        let op_event = match OperationEvent::from_parts(event, message_id, payload) {
            Ok(op_event) => op_event,
            Err(err) => {
                self.report(wire_error(err, &operation_id), Some(frame));
                return;
            }
        };

        if self.config.enable_validation
            && let Err(err) = self.check_lists(&op_event)
        {
            self.report(err, Some(frame));
            return;
        }

        if let Err(err) = self.track(&op_event, byte_len) {
            self.report(err, Some(frame));
            return;
        }

        self.dispatch(&op_event).await;
    }

    fn resolve_event_name(
        &self,
        frame: &RawFrame,
        payload: &EventPayload,
    ) -> Result<Option<EventName>, ParseError> {
        let tag = frame
            .event
            .as_deref()
            .filter(|tag| !tag.is_empty() && *tag != DEFAULT_SSE_EVENT)
            .or(payload.event.as_deref());
        let Some(name) = tag else {
            return Err(ParseError::Decode {
                reason: "frame carries no event name".to_string(),
            });
        };
        match EventName::from_str(name) {
            Ok(event) => Ok(Some(event)),
            Err(_) if self.config.enable_validation => Err(ParseError::UnknownEvent {
                name: name.to_string(),
            }),
            Err(_) => {
                debug!("ignoring unknown event `{name}` (validation disabled)");
                Ok(None)
            }
        }
    }

    fn check_lists(&self, op_event: &OperationEvent) -> Result<(), ParseError> {
        match &op_event.data {
            OperationData::File(data) => {
                let path = data.file_path.as_str();
                let blocked = self
                    .config
                    .blocked_file_paths
                    .iter()
                    .any(|prefix| path.starts_with(prefix));
                let allowed = self.config.allowed_file_paths.is_empty()
                    || self
                        .config
                        .allowed_file_paths
                        .iter()
                        .any(|prefix| path.starts_with(prefix));
                if blocked || !allowed {
                    return Err(ParseError::PathNotAllowed {
                        path: path.to_string(),
                    });
                }
            }
            OperationData::Command(data) => {
                let command = data.command.as_str();
                let program = command.split_whitespace().next().unwrap_or(command);
                let hit = |needle: &String| needle == command || needle == program;
                let blocked = self.config.blocked_commands.iter().any(hit);
                let allowed = self.config.allowed_commands.is_empty()
                    || self.config.allowed_commands.iter().any(hit);
                if blocked || !allowed {
                    return Err(ParseError::CommandNotAllowed {
                        command: command.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn track(&mut self, op_event: &OperationEvent, byte_len: usize) -> Result<(), ParseError> {
        let now = Instant::now();
        self.touch_message(&op_event.message_id);

        let Some(msg) = self.messages.get_mut(&op_event.message_id) else {
            return Ok(());
        };

        if self.config.enable_validation {
            if msg.total_bytes + byte_len > self.config.max_message_size {
                msg.limit_tripped = true;
                return Err(ParseError::LimitExceeded {
                    message_id: op_event.message_id.clone(),
                    limit: LimitKind::MessageSize {
                        max: self.config.max_message_size,
                    },
                });
            }
            if !msg.operations.contains_key(&op_event.operation_id)
                && msg.operations.len() >= self.config.max_operations_per_message
            {
                msg.limit_tripped = true;
                return Err(ParseError::LimitExceeded {
                    message_id: op_event.message_id.clone(),
                    limit: LimitKind::OperationCount {
                        max: self.config.max_operations_per_message,
                    },
                });
            }
        }
        msg.total_bytes += byte_len;

        let kind = op_event.event.kind();
        let phase = op_event.event.phase();
        let data_len = match &op_event.data {
            OperationData::File(data) => data.content.len(),
            OperationData::Command(data) => data.command.len(),
        };

        match msg.operations.get_mut(&op_event.operation_id) {
            Some(op) => {
                if op.kind != kind {
                    return Err(ParseError::KindMismatch {
                        operation_id: op_event.operation_id.clone(),
                        previous: op.kind,
                        requested: kind,
                    });
                }
                op.last_event_at = now;
                op.accumulated_bytes += data_len;
                if matches!(phase, Some(OperationPhase::Progress)) && op.ended {
                    self.stats.progress_after_end += 1;
                    warn!(
                        "progress event for already-ended operation {}",
                        op_event.operation_id
                    );
                }
                op.phase = phase;
                // `ended` is sticky: a late progress event does not reopen
                // the operation.
                if !matches!(phase, Some(OperationPhase::Start | OperationPhase::Progress)) {
                    op.ended = true;
                }
            }
            None => {
                // First sight of this operation. Anything other than a
                // `-start` means we joined the stream mid-operation.
                let synthesized = matches!(
                    phase,
                    Some(OperationPhase::Progress | OperationPhase::End)
                );
                if synthesized {
                    self.stats.synthesized_operations += 1;
                    debug!(
                        "synthesized state for operation {} from {} event",
                        op_event.operation_id, op_event.event
                    );
                }
                msg.operations.insert(
                    op_event.operation_id.clone(),
                    OperationState {
                        kind,
                        phase,
                        last_event_at: now,
                        accumulated_bytes: data_len,
                        synthesized,
                        ended: !matches!(
                            phase,
                            Some(OperationPhase::Start | OperationPhase::Progress)
                        ),
                        timed_out: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Refreshes recency for the message, creating its state on first
    /// sight and evicting the least-recently-touched entry over the cap.
    fn touch_message(&mut self, message_id: &str) {
        if let Some(state) = self.messages.shift_remove(message_id) {
            self.messages.insert(message_id.to_string(), state);
            return;
        }
        self.messages
            .insert(message_id.to_string(), MessageState::new());
        while self.messages.len() > self.config.max_tracked_messages {
            if let Some((evicted_id, _)) = self.messages.shift_remove_index(0) {
                self.stats.evicted_messages += 1;
                debug!("evicted state for untended message {evicted_id}");
            }
        }
    }

    async fn dispatch(&self, op_event: &OperationEvent) {
        let ctx = OperationContext {
            event: op_event.event,
            message_id: op_event.message_id.clone(),
            operation_id: op_event.operation_id.clone(),
        };
        let result = match (&op_event.data, op_event.event) {
            (OperationData::Command(data), _) => self.handler.on_cmd(&ctx, data).await,
            (OperationData::File(data), EventName::AddStart) => {
                self.handler.on_add_start(&ctx, data).await
            }
            (OperationData::File(data), EventName::AddProgress) => {
                self.handler.on_add_progress(&ctx, data).await
            }
            (OperationData::File(data), EventName::AddEnd) => {
                self.handler.on_add_end(&ctx, data).await
            }
            (OperationData::File(data), EventName::EditStart) => {
                self.handler.on_edit_start(&ctx, data).await
            }
            (OperationData::File(data), EventName::EditProgress) => {
                self.handler.on_edit_progress(&ctx, data).await
            }
            (OperationData::File(data), EventName::EditEnd) => {
                self.handler.on_edit_end(&ctx, data).await
            }
            (OperationData::File(data), EventName::DeleteStart) => {
                self.handler.on_delete_start(&ctx, data).await
            }
            (OperationData::File(data), EventName::DeleteProgress) => {
                self.handler.on_delete_progress(&ctx, data).await
            }
            (OperationData::File(data), EventName::DeleteEnd) => {
                self.handler.on_delete_end(&ctx, data).await
            }
            // from_parts pins the payload family to the event kind.
            (OperationData::File(_), EventName::Cmd) => Ok(()),
        };

        if let Err(err) = result {
            let error = ParseError::SideEffect {
                event: op_event.event,
                reason: format!("{err:#}"),
            };
            warn!("{error}");
            self.handler.on_error(&error, None);
        }
    }

    fn report(&self, error: ParseError, raw: Option<&RawFrame>) {
        warn!("parser error: {error}");
        self.handler.on_error(&error, raw);
    }
}

fn decode(frame: &RawFrame) -> Result<(EventPayload, usize), ParseError> {
    match &frame.payload {
        RawPayload::Text(text) => serde_json::from_str(text)
            .map(|payload| (payload, text.len()))
            .map_err(|err| ParseError::Decode {
                reason: err.to_string(),
            }),
        RawPayload::Json(value) => {
            let byte_len = value.to_string().len();
            serde_json::from_value(value.clone())
                .map(|payload| (payload, byte_len))
                .map_err(|err| ParseError::Decode {
                    reason: err.to_string(),
                })
        }
    }
}

fn wire_error(err: WireError, operation_id: &str) -> ParseError {
    match err {
        WireError::KindMismatch { expected, found } => ParseError::KindMismatch {
            operation_id: operation_id.to_string(),
            previous: expected,
            requested: found,
        },
        other => ParseError::Decode {
            reason: other.to_string(),
        },
    }
}
