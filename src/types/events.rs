//! Session event types
//!
//! Events arrive as `session.event` notifications. The `type` tag selects a
//! variant of [`SessionEventKind`]; payloads the client acts on are typed, the
//! rest are carried as raw JSON.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CopilotError, Result};

/// A single event reported by the CLI for one session
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawSessionEvent")]
pub struct SessionEvent {
    /// Event id assigned by the CLI
    pub id: Option<String>,
    /// ISO-8601 timestamp
    pub timestamp: Option<String>,
    /// Id of the event this one follows from
    pub parent_id: Option<String>,
    /// Ephemeral events are not persisted in session history
    pub ephemeral: bool,
    /// Raw `type` tag as sent on the wire
    pub event_type: String,
    /// Decoded payload
    pub kind: SessionEventKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSessionEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    ephemeral: Option<bool>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl From<RawSessionEvent> for SessionEvent {
    fn from(raw: RawSessionEvent) -> Self {
        let kind = SessionEventKind::parse(&raw.event_type, raw.data);
        Self {
            id: raw.id,
            timestamp: raw.timestamp,
            parent_id: raw.parent_id,
            ephemeral: raw.ephemeral.unwrap_or(false),
            event_type: raw.event_type,
            kind,
        }
    }
}

impl SessionEvent {
    /// Decode an event from its JSON object
    ///
    /// # Errors
    /// Returns error if the value has no `type` string
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Build an event with the given kind and no envelope metadata
    #[must_use]
    pub fn new(event_type: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            id: None,
            timestamp: None,
            parent_id: None,
            ephemeral: false,
            event_type: event_type.into(),
            kind,
        }
    }

    /// Parsed `timestamp`, if present and valid RFC 3339
    #[must_use]
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Whether this is `session.idle`
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.kind, SessionEventKind::SessionIdle(_))
    }

    /// Assistant message payload, if this is `assistant.message`
    #[must_use]
    pub fn as_assistant_message(&self) -> Option<&AssistantMessageData> {
        match &self.kind {
            SessionEventKind::AssistantMessage(data) => Some(data),
            _ => None,
        }
    }

    /// Error payload, if this is `session.error`
    #[must_use]
    pub fn as_session_error(&self) -> Option<&SessionErrorData> {
        match &self.kind {
            SessionEventKind::SessionError(data) => Some(data),
            _ => None,
        }
    }
}

/// Closed set of event kinds the CLI emits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[allow(missing_docs)]
pub enum SessionEventKind {
    #[serde(rename = "session.start")]
    SessionStart(Value),
    #[serde(rename = "session.resume")]
    SessionResume(Value),
    #[serde(rename = "session.error")]
    SessionError(SessionErrorData),
    #[serde(rename = "session.idle")]
    SessionIdle(Value),
    #[serde(rename = "session.info")]
    SessionInfo(Value),
    #[serde(rename = "session.model_change")]
    SessionModelChange(Value),
    #[serde(rename = "session.mode_changed")]
    SessionModeChanged(Value),
    #[serde(rename = "session.plan_changed")]
    SessionPlanChanged(Value),
    #[serde(rename = "session.workspace_file_changed")]
    SessionWorkspaceFileChanged(Value),
    #[serde(rename = "session.handoff")]
    SessionHandoff(Value),
    #[serde(rename = "session.truncation")]
    SessionTruncation(Value),
    #[serde(rename = "session.snapshot_rewind")]
    SessionSnapshotRewind(Value),
    #[serde(rename = "session.usage_info")]
    SessionUsageInfo(Value),
    #[serde(rename = "session.compaction_start")]
    SessionCompactionStart(Value),
    #[serde(rename = "session.compaction_complete")]
    SessionCompactionComplete(Value),
    #[serde(rename = "session.context_changed")]
    SessionContextChanged(Value),
    #[serde(rename = "session.shutdown")]
    SessionShutdown(Value),
    #[serde(rename = "user.message")]
    UserMessage(Value),
    #[serde(rename = "pending_messages.modified")]
    PendingMessagesModified(Value),
    #[serde(rename = "assistant.turn_start")]
    AssistantTurnStart(Value),
    #[serde(rename = "assistant.intent")]
    AssistantIntent(Value),
    #[serde(rename = "assistant.reasoning")]
    AssistantReasoning(Value),
    #[serde(rename = "assistant.reasoning_delta")]
    AssistantReasoningDelta(Value),
    #[serde(rename = "assistant.message")]
    AssistantMessage(AssistantMessageData),
    #[serde(rename = "assistant.message_delta")]
    AssistantMessageDelta(Value),
    #[serde(rename = "assistant.turn_end")]
    AssistantTurnEnd(Value),
    #[serde(rename = "assistant.usage")]
    AssistantUsage(Value),
    #[serde(rename = "abort")]
    Abort(Value),
    #[serde(rename = "tool.user_requested")]
    ToolUserRequested(Value),
    #[serde(rename = "tool.execution_start")]
    ToolExecutionStart(Value),
    #[serde(rename = "tool.execution_partial_result")]
    ToolExecutionPartialResult(Value),
    #[serde(rename = "tool.execution_progress")]
    ToolExecutionProgress(Value),
    #[serde(rename = "tool.execution_complete")]
    ToolExecutionComplete(Value),
    #[serde(rename = "subagent.started")]
    SubagentStarted(Value),
    #[serde(rename = "subagent.completed")]
    SubagentCompleted(Value),
    #[serde(rename = "subagent.failed")]
    SubagentFailed(Value),
    #[serde(rename = "subagent.selected")]
    SubagentSelected(Value),
    #[serde(rename = "hook.start")]
    HookStart(Value),
    #[serde(rename = "hook.end")]
    HookEnd(Value),
    #[serde(rename = "system.message")]
    SystemMessage(Value),
    #[serde(rename = "skill.invoked")]
    SkillInvoked(Value),
    /// A kind this client does not know; still delivered to subscribers
    #[serde(skip)]
    Unknown { event_type: String, data: Value },
}

impl SessionEventKind {
    /// Decode `(type, data)` into a kind, falling back to [`SessionEventKind::Unknown`]
    #[must_use]
    pub fn parse(event_type: &str, data: Value) -> Self {
        let data = if data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            data
        };
        let tagged = serde_json::json!({ "type": event_type, "data": data });
        match serde_json::from_value(tagged) {
            Ok(kind) => kind,
            Err(e) => {
                log::debug!("Unrecognized session event '{event_type}': {e}");
                Self::Unknown {
                    event_type: event_type.to_string(),
                    data,
                }
            }
        }
    }
}

/// Payload of `assistant.message`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessageData {
    /// Message id
    #[serde(default)]
    pub message_id: Option<String>,
    /// Final message text
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls requested in this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
    /// Set when the message belongs to a sub-agent tool call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
    /// Visible reasoning text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
}

/// A tool call requested by the assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Tool call id
    pub tool_call_id: String,
    /// Tool name
    pub name: String,
    /// Arguments as sent by the model
    #[serde(default)]
    pub arguments: Value,
}

/// Payload of `session.error`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    /// Error category
    #[serde(default)]
    pub error_type: Option<String>,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Stack trace from the CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// HTTP status code of a failed provider call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<f64>,
}

// ============================================================================
// Subscribers and error policy
// ============================================================================

/// What happens to the remaining subscribers when one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventErrorPolicy {
    /// Log and skip the remaining subscribers for this event
    #[default]
    PropagateAndLogErrors,
    /// Log and keep delivering this event to the remaining subscribers
    SuppressAndLogErrors,
}

/// Subscriber callback for session events
pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> Result<()> + Send + Sync>;

/// Called with every subscriber failure before the policy is applied
pub type EventErrorHandler =
    Arc<dyn Fn(&SessionEvent, &CopilotError) -> Result<()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_assistant_message() {
        let event = SessionEvent::from_value(json!({
            "id": "e1",
            "type": "assistant.message",
            "data": {"messageId": "m1", "content": "hello"}
        }))
        .unwrap();
        let msg = event.as_assistant_message().unwrap();
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert_eq!(event.id.as_deref(), Some("e1"));
    }

    #[test]
    fn idle_without_data_is_recognized() {
        let event = SessionEvent::from_value(json!({"type": "session.idle"})).unwrap();
        assert!(event.is_idle());
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let event =
            SessionEvent::from_value(json!({"type": "future.thing", "data": {"x": 1}})).unwrap();
        match event.kind {
            SessionEventKind::Unknown { event_type, data } => {
                assert_eq!(event_type, "future.thing");
                assert_eq!(data["x"], 1);
            }
            other => panic!("expected unknown kind, got {other:?}"),
        }
    }

    #[test]
    fn timestamp_is_parsed_when_valid() {
        let event = SessionEvent::from_value(json!({
            "type": "session.idle",
            "timestamp": "2025-01-02T03:04:05.000Z"
        }))
        .unwrap();
        let at = event.occurred_at().unwrap();
        assert_eq!(at.timestamp(), 1_735_787_045);

        let event =
            SessionEvent::from_value(json!({"type": "session.idle", "timestamp": "yesterday"}))
                .unwrap();
        assert!(event.occurred_at().is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(SessionEvent::from_value(json!({"data": {}})).is_err());
    }
}
