//! The task envelope: the immutable unit of work.
//!
//! An envelope bundles identity, the locked expert judgment, org context,
//! the task definition and the security context. It is assembled by the
//! orchestrator (security fields populated only by the Policy and Budget
//! engines) and never mutated after dispatch to a worker.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::policy::{ConfidenceRange, Constraint, Trigger};

/// Org-level optimization posture for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    #[default]
    Balanced,
    Speed,
    Quality,
    Cost,
}

/// Expert judgment locked at boot: patterns, triggers, hard constraints
/// and the confidence map, all byte-identical to the booted policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertJudgment {
    pub patterns: Vec<String>,
    pub escalation_triggers: Vec<Trigger>,
    pub hard_constraints: Vec<Constraint>,
    pub confidence_map: Vec<ConfidenceRange>,
    pub version: u32,
}

/// Persistent working-memory snapshot, capped per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveContextSnapshot {
    pub decisions: Vec<String>,
    pub history: Vec<String>,
    pub open_questions: Vec<String>,
    pub experiments: Vec<String>,
    pub key_people: Vec<String>,
    /// Tasks currently executing against this context
    pub in_flight: Vec<String>,
}

impl ActiveContextSnapshot {
    pub const MAX_DECISIONS: usize = 15;
    pub const MAX_HISTORY: usize = 10;
    pub const MAX_OPEN_QUESTIONS: usize = 20;
    pub const MAX_EXPERIMENTS: usize = 10;
    pub const MAX_KEY_PEOPLE: usize = 15;

    /// Truncate every field to its cap, keeping the most recent entries.
    pub fn capped(mut self) -> Self {
        fn tail(v: &mut Vec<String>, cap: usize) {
            if v.len() > cap {
                v.drain(..v.len() - cap);
            }
        }
        tail(&mut self.decisions, Self::MAX_DECISIONS);
        tail(&mut self.history, Self::MAX_HISTORY);
        tail(&mut self.open_questions, Self::MAX_OPEN_QUESTIONS);
        tail(&mut self.experiments, Self::MAX_EXPERIMENTS);
        tail(&mut self.key_people, Self::MAX_KEY_PEOPLE);
        self
    }
}

/// Organizational context gathered at envelope build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgContext {
    pub goal: String,
    /// Recent decisions, capped at build time
    pub active_decisions: Vec<String>,
    pub key_people: Vec<String>,
    pub remaining_budget_dollars: f64,
    pub constraints: Vec<String>,
    /// Knowledge-graph excerpts, at most [`OrgContext::MAX_KNOWLEDGE_EXCERPTS`]
    pub knowledge_excerpts: Vec<String>,
    pub active_context: ActiveContextSnapshot,
    pub mode: OptimizationMode,
}

impl OrgContext {
    pub const MAX_KNOWLEDGE_EXCERPTS: usize = 8;
}

/// What the task is: spec text, acceptance criteria, cost estimates and
/// dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub spec: String,
    pub acceptance_criteria: Vec<String>,
    pub estimated_tokens: u64,
    pub estimated_dollars: f64,
    /// Task ids this task depends on
    pub depends_on: Vec<String>,
    /// Pointer to where the outcome lands (decision log id, document, ...)
    pub outcome_ref: Option<String>,
}

impl TaskDefinition {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            ..Default::default()
        }
    }
}

/// Security bounds for one task. Populated only by the Policy Engine and
/// Budget Engine during envelope assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Capability adapters this task may touch
    pub allowed_adapters: HashSet<String>,
    pub max_spend_dollars: f64,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
}

/// The immutable unit of work handed to a pipeline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub agent_id: String,
    pub company_id: String,
    pub seat_id: Option<String>,
    pub expert_id: Option<String>,
    pub judgment: ExpertJudgment,
    pub org: OrgContext,
    pub task: TaskDefinition,
    pub security: SecurityContext,
    pub mode: OptimizationMode,
}

impl TaskEnvelope {
    /// Adapter allow-list check against the security context.
    pub fn adapter_allowed(&self, adapter_id: &str) -> bool {
        self.security.allowed_adapters.contains(adapter_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_context_caps_keep_most_recent() {
        let snapshot = ActiveContextSnapshot {
            history: (0..25).map(|i| format!("h{i}")).collect(),
            ..Default::default()
        }
        .capped();
        assert_eq!(snapshot.history.len(), ActiveContextSnapshot::MAX_HISTORY);
        assert_eq!(snapshot.history.first().unwrap(), "h15");
        assert_eq!(snapshot.history.last().unwrap(), "h24");
    }
}
