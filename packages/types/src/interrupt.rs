//! Halt-signal records for the interrupt store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a task was halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    User,
    Policy,
    Confidence,
    Budget,
    CircuitBreaker,
}

/// One halt signal. Created by `halt`, destroyed by `resume` or TTL expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub reason: InterruptReason,
    pub halted_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl InterruptRecord {
    pub fn new(reason: InterruptReason, message: Option<String>) -> Self {
        Self {
            reason,
            halted_at: Utc::now(),
            message,
        }
    }
}
