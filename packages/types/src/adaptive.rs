//! Adaptive parameters learned by the reinforcement loop.
//!
//! Parameters are keyed by (company, agent, task classification) and
//! versioned: only the most recent version is active, all prior versions
//! are retained for audit. Every bounded parameter carries an explicit
//! range; per-update movement is capped to 10% of that range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Closed interval bounds for a learned parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Largest per-update movement: 10% of the range span.
    pub fn max_delta(&self) -> f64 {
        0.1 * self.span()
    }
}

pub const PROVIDER_WEIGHT_RANGE: ParamRange = ParamRange::new(-1.0, 1.0);
pub const ESCALATION_DELTA_RANGE: ParamRange = ParamRange::new(-0.2, 0.2);
pub const BUDGET_MULTIPLIER_RANGE: ParamRange = ParamRange::new(0.5, 2.0);
pub const RETRY_WEIGHTING_RANGE: ParamRange = ParamRange::new(0.5, 2.0);
pub const DELEGATION_DEPTH_RANGE: ParamRange = ParamRange::new(0.5, 1.5);

/// The adaptive parameter set for one (company, agent, task-class) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub company_id: String,
    pub agent_id: String,
    pub task_class: String,
    pub version: u32,
    /// Per-provider Q-values in [-1, 1]
    pub provider_weights: HashMap<String, f64>,
    /// Learned delta applied on top of the base escalation threshold
    pub escalation_threshold_delta: f64,
    pub budget_multiplier: f64,
    pub retry_weighting: f64,
    pub delegation_depth_factor: f64,
    /// Current learning rate α
    pub learning_rate: f64,
    pub update_count: u64,
    pub frozen: bool,
}

impl AdaptiveParams {
    pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

    /// Defaults for a key with no active stored row.
    pub fn defaults(
        company_id: impl Into<String>,
        agent_id: impl Into<String>,
        task_class: impl Into<String>,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            agent_id: agent_id.into(),
            task_class: task_class.into(),
            version: 0,
            provider_weights: HashMap::new(),
            escalation_threshold_delta: 0.0,
            budget_multiplier: 1.0,
            retry_weighting: 1.0,
            delegation_depth_factor: 1.0,
            learning_rate: Self::DEFAULT_LEARNING_RATE,
            update_count: 0,
            frozen: false,
        }
    }

    /// Storage key for this parameter set.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.company_id, self.agent_id, self.task_class)
    }
}

/// The five normalized reward components and their weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub outcome_delta: f64,
    pub cost_efficiency: f64,
    pub escalation_precision: f64,
    pub override_penalty: f64,
    pub calibration_error: f64,
    /// Weighted sum, clamped to [-1, 1]
    pub total: f64,
}

/// Append-only audit row for one parameter update (frozen no-ops included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveAuditRow {
    pub id: Uuid,
    pub company_id: String,
    pub agent_id: String,
    pub task_class: String,
    pub reward: RewardBreakdown,
    pub params_before: AdaptiveParams,
    pub params_after: AdaptiveParams,
    pub alpha_used: f64,
    pub frozen: bool,
    pub freeze_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
