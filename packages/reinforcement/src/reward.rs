//! The reward vector: five normalized components, weights summing to 1.

use serde::{Deserialize, Serialize};

use steward_types::RewardBreakdown;

/// Observed outcome of one task, as fed to the loop by the post-task hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub company_id: String,
    pub agent_id: String,
    pub task_class: String,
    /// Provider actually used for the task's completion
    pub provider_id: String,
    pub success: bool,
    /// Performance-lift delta vs. baseline, when the scheduled job has one
    pub apl_delta: Option<f64>,
    pub actual_cost_dollars: f64,
    pub budget_dollars: f64,
    pub escalated: bool,
    /// Whether a human confirmed the escalation was warranted
    pub escalation_warranted: Option<bool>,
    pub human_override: bool,
    /// The lens confidence reported for the final output
    pub confidence: f64,
}

const W_OUTCOME: f64 = 0.40;
const W_COST: f64 = 0.20;
const W_ESCALATION: f64 = 0.20;
const W_OVERRIDE: f64 = 0.10;
const W_CALIBRATION: f64 = 0.10;

/// Compute the reward vector for an outcome. Every component is clamped
/// to [-1, 1] and the weighted total again.
pub fn compute_reward(outcome: &TaskOutcome) -> RewardBreakdown {
    let outcome_delta = match outcome.apl_delta {
        Some(delta) => delta.clamp(-1.0, 1.0),
        None if outcome.success => 0.5,
        None => -0.5,
    };

    let cost_efficiency = if outcome.budget_dollars > 0.0 {
        (1.0 - outcome.actual_cost_dollars / outcome.budget_dollars).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let escalation_precision = if !outcome.escalated {
        0.0
    } else {
        match outcome.escalation_warranted {
            Some(true) => 1.0,
            Some(false) => -1.0,
            // Escalated but not yet adjudicated: neutral.
            None => 0.0,
        }
    };

    let override_penalty = if outcome.human_override { -1.0 } else { 0.0 };

    let actual = if outcome.success { 1.0 } else { 0.0 };
    let calibration_error = -(outcome.confidence - actual).abs();

    let total = (W_OUTCOME * outcome_delta
        + W_COST * cost_efficiency
        + W_ESCALATION * escalation_precision
        + W_OVERRIDE * override_penalty
        + W_CALIBRATION * calibration_error)
        .clamp(-1.0, 1.0);

    RewardBreakdown {
        outcome_delta,
        cost_efficiency,
        escalation_precision,
        override_penalty,
        calibration_error,
        total,
    }
}
