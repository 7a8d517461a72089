//! Per-task events and the append-only telemetry log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event published on a task's pub/sub channel. This is what the external
/// interface (WebSocket clients, capability frontends) consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Human-readable status transition
    Status { message: String },
    /// Streaming model output
    Stream { chunk: String },
    /// The model invoked a capability adapter
    ToolCall { tool: String, description: String },
    /// Task paused awaiting human review
    ApprovalNeeded {
        task_id: String,
        action: String,
        context: String,
    },
    /// Terminal success, with spend
    Done { cost: f64, tokens: u64 },
    /// Terminal failure. `is_interrupt` distinguishes a user stop from a
    /// genuine error.
    Error { message: String, is_interrupt: bool },
}

impl Event {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Failure/outcome class recorded in the telemetry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    TaskCompleted,
    TaskFailed,
    ConstraintViolation,
    CircuitBreakerHardTrip,
    TaskInterrupted,
    BudgetExceeded,
    PolicyBlocked,
    ApprovalTimeout,
    AdaptiveUpdate,
    AdaptiveFrozen,
}

/// Append-only telemetry row. Detail payloads are redacted before insert;
/// credential-shaped substrings never reach the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub event_type: TelemetryKind,
    pub success: bool,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(
        event_type: TelemetryKind,
        success: bool,
        task_id: Option<String>,
        agent_id: Option<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            agent_id,
            event_type,
            success,
            detail,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(Event::status("Calling LLM")).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["message"], "Calling LLM");

        let json = serde_json::to_value(Event::Done {
            cost: 0.01,
            tokens: 42,
        })
        .unwrap();
        assert_eq!(json["type"], "done");
    }

    #[test]
    fn terminal_events() {
        assert!(Event::Done {
            cost: 0.0,
            tokens: 0
        }
        .is_terminal());
        assert!(Event::Error {
            message: "x".into(),
            is_interrupt: false
        }
        .is_terminal());
        assert!(!Event::status("x").is_terminal());
    }
}
