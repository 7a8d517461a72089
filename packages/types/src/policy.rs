//! Boot-locked policy records.
//!
//! Constraints, escalation triggers and the confidence map are loaded from
//! durable storage once at process start and frozen for the process
//! lifetime. Nothing hands out mutable access after boot; adaptive layers
//! apply their learned deltas on top, never in place.

use serde::{Deserialize, Serialize};

/// Category of a hard constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintCategory {
    Security,
    Compliance,
    Brand,
    Operational,
    Legal,
}

impl ConstraintCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Security => "SECURITY",
            Self::Compliance => "COMPLIANCE",
            Self::Brand => "BRAND",
            Self::Operational => "OPERATIONAL",
            Self::Legal => "LEGAL",
        }
    }
}

/// A hard constraint. Violation aborts the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    /// Rule text the violation heuristic tokenizes
    pub rule: String,
    pub category: ConstraintCategory,
    /// Critical constraints are called out separately in the constraint block
    pub critical: bool,
}

/// What a matched trigger forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    Escalate,
    Pause,
    Abort,
}

/// An escalation trigger: a pattern whose match on output forces review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub description: String,
    /// Case-insensitive substrings matched against model output
    pub patterns: Vec<String>,
    pub action: TriggerAction,
    pub priority: u8,
}

/// Action for a confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceAction {
    Act,
    SlowDown,
    Escalate,
}

/// One band of the ordered confidence map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRange {
    pub min: f64,
    pub max: f64,
    pub action: ConfidenceAction,
}

impl ConfidenceRange {
    pub fn new(min: f64, max: f64, action: ConfidenceAction) -> Self {
        Self { min, max, action }
    }

    pub fn contains(&self, confidence: f64) -> bool {
        confidence >= self.min && confidence <= self.max
    }
}
