//! Heuristic task classification.
//!
//! Keyword sets decide the class; the contract is the enum, so a learned
//! classifier can replace the heuristics without touching callers.

use serde::{Deserialize, Serialize};

/// Task classification driving provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Credential-adjacent content; must stay on local-capable providers
    Sensitive,
    /// Analysis and strategy work
    JudgmentHeavy,
    /// Short mechanical transforms
    Fast,
    Standard,
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensitive => "sensitive",
            Self::JudgmentHeavy => "judgment_heavy",
            Self::Fast => "fast",
            Self::Standard => "standard",
        }
    }
}

/// Classification plus routing requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    pub class: TaskClass,
    pub requires_local_only: bool,
}

const SENSITIVE_TERMS: &[&str] = &[
    "password",
    "credential",
    "ssn",
    "social security",
    "credit card",
    "private key",
];

const JUDGMENT_TERMS: &[&str] = &[
    "analyze", "evaluate", "recommend", "strategy", "decision", "assess",
];

const FAST_TERMS: &[&str] = &["format", "convert", "summarize", "extract", "list"];

/// Longest spec still eligible for the fast class.
const FAST_SPEC_MAX_CHARS: usize = 200;

/// Hard-constraint count above which fast is upgraded to standard.
const FAST_UPGRADE_CONSTRAINT_COUNT: usize = 5;

/// Classify a task spec.
pub fn classify(spec: &str, hard_constraint_count: usize) -> TaskProfile {
    let lower = spec.to_lowercase();

    if SENSITIVE_TERMS.iter().any(|t| lower.contains(t)) {
        return TaskProfile {
            class: TaskClass::Sensitive,
            requires_local_only: true,
        };
    }
    if JUDGMENT_TERMS.iter().any(|t| lower.contains(t)) {
        return TaskProfile {
            class: TaskClass::JudgmentHeavy,
            requires_local_only: false,
        };
    }
    if spec.len() < FAST_SPEC_MAX_CHARS && FAST_TERMS.iter().any(|t| lower.contains(t)) {
        // A constraint-heavy envelope deserves the standard path even for
        // mechanical work.
        let class = if hard_constraint_count > FAST_UPGRADE_CONSTRAINT_COUNT {
            TaskClass::Standard
        } else {
            TaskClass::Fast
        };
        return TaskProfile {
            class,
            requires_local_only: false,
        };
    }
    TaskProfile {
        class: TaskClass::Standard,
        requires_local_only: false,
    }
}
