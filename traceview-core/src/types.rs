//! Core domain types for traceview
//!
//! These types cover both sides of the engine: the flat event log the backend
//! emits, and the structured transcript derived from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One record of the append-only session log (user text, agent text, tool call, …) |
//! | **WireEvent** | An event as decoded from the push stream, before it has an id |
//! | **Turn** | One user request and everything the agent did in response |
//! | **Step** | A single displayable unit of agent activity inside a Turn |
//! | **Confirmed** | Events fetched from the session store, with server-assigned ids |
//! | **Pending** | Events seen live but not yet known to be persisted |
//!
//! Event ids are totally ordered within one source: confirmed events carry
//! positive server ids, pending events are assigned synthetic negative ids by
//! the [`Reconciler`](crate::reconcile::Reconciler). Timestamps are for
//! display and content keys only; ordering is always positional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Events
// ============================================

/// Discriminant of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserMessage,
    AgentMessage,
    ToolCall,
    ToolResult,
    StatusChange,
    Error,
    /// Protocol-level heartbeat; filtered at the channel boundary and never
    /// reaches the assembler.
    Keepalive,
    /// Forward compatibility: event types this build does not know about
    /// decode cleanly and produce no steps.
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserMessage => "user_message",
            EventType::AgentMessage => "agent_message",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::StatusChange => "status_change",
            EventType::Error => "error",
            EventType::Keepalive => "keepalive",
            EventType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record of the session event log.
///
/// Immutable once constructed; the log is append-only and events are never
/// patched in place. `data` is an opaque payload whose fields depend on
/// `event_type` (e.g. `{content}` for messages, `{tool, input, id}` for tool
/// calls, `{status}` for status changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned positive id, or synthetic negative id for live events.
    pub id: i64,
    /// Originator tag ("user", "agent", "orchestrator", …). Informational.
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Type-specific payload. `null` when the server stored no data.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An event as it arrives on the push stream, before the reconciler assigns
/// a synthetic id.
///
/// Replayed frames carry a server id and a `replayed` flag; both are ignored
/// here because dedup against the confirmed log is done by content key, not
/// by id (the transport and the store do not share an id space).
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WireEvent {
    /// Materialize this wire event with the given id.
    pub fn into_event(self, id: i64) -> Event {
        Event {
            id,
            role: self.role,
            event_type: self.event_type,
            data: self.data,
            timestamp: self.timestamp,
        }
    }
}

// ============================================
// Sessions
// ============================================

/// Lifecycle status of a session, as reported by the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Whether the run has reached a terminal state. Once terminal, the
    /// confirmed log is authoritative and complete.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a session's durable state: its status plus the confirmed
/// event log in authoritative server order.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub events: Vec<Event>,
}

// ============================================
// Steps
// ============================================

/// Kind of a displayable step within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thinking,
    FileRead,
    FileWrite,
    FileCreate,
    FileDelete,
    Command,
    Browse,
    Status,
    Error,
    SubAgent,
    Github,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Thinking => "thinking",
            StepType::FileRead => "file_read",
            StepType::FileWrite => "file_write",
            StepType::FileCreate => "file_create",
            StepType::FileDelete => "file_delete",
            StepType::Command => "command",
            StepType::Browse => "browse",
            StepType::Status => "status",
            StepType::Error => "error",
            StepType::SubAgent => "sub_agent",
            StepType::Github => "github",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single unit of agent activity inside a turn.
///
/// Steps have no identity outside their turn; both are rebuilt wholesale on
/// every assembly pass.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// Id of the originating event.
    pub id: i64,
    pub step_type: StepType,
    pub timestamp: Option<DateTime<Utc>>,
    /// Short summary line.
    pub label: String,
    /// Populated asynchronously: a matching tool result may fill this in
    /// later in the log. Absent until matched.
    pub detail: Option<String>,
    /// Whether `detail` may ever be populated.
    pub expandable: bool,
}

// ============================================
// Turns
// ============================================

/// One conversational turn: a user message and the agent activity that
/// answers it.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    /// Stable id derived from the originating user-message event, or
    /// `"turn-initial"` when the log does not begin with one.
    pub id: String,
    pub user_message: Option<String>,
    pub user_message_ts: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
    /// Final answer text, either from an explicit `complete` call or promoted
    /// from trailing agent prose.
    pub answer: Option<String>,
    pub answer_ts: Option<DateTime<Utc>>,
    /// True while the turn is open and no terminal signal has arrived.
    pub is_working: bool,
    pub was_interrupted: bool,
    pub had_error: bool,
}

impl Turn {
    /// Whether any terminal condition has been recorded for this turn.
    pub fn is_concluded(&self) -> bool {
        !self.is_working
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        let json = r#""tool_call""#;
        let et: EventType = serde_json::from_str(json).unwrap();
        assert_eq!(et, EventType::ToolCall);
        assert_eq!(et.as_str(), "tool_call");
    }

    #[test]
    fn test_event_type_unknown_is_forward_compatible() {
        let et: EventType = serde_json::from_str(r#""telemetry_blob""#).unwrap();
        assert_eq!(et, EventType::Unknown);
    }

    #[test]
    fn test_wire_event_decodes_replay_frame() {
        // Replay frames carry extra fields (id, replayed); both are ignored.
        let json = r#"{
            "id": 42,
            "role": "agent",
            "type": "agent_message",
            "data": {"content": "hello"},
            "timestamp": "2026-01-10T12:00:00Z",
            "replayed": true
        }"#;
        let wire: WireEvent = serde_json::from_str(json).unwrap();
        assert_eq!(wire.event_type, EventType::AgentMessage);
        let event = wire.into_event(-1);
        assert_eq!(event.id, -1);
        assert_eq!(event.data["content"], "hello");
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_session_status_from_str() {
        assert_eq!(
            "running".parse::<SessionStatus>().unwrap(),
            SessionStatus::Running
        );
        assert!("paused".parse::<SessionStatus>().is_err());
    }
}
