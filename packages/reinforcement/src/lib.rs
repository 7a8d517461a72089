//! The Reinforcement Loop.
//!
//! Adjusts routing and escalation parameters from observed task outcomes
//! without ever touching boot-locked policy. Each outcome produces a
//! five-component reward vector; parameters move by bounded Q-updates
//! under the guardrails (volatility freeze, α-decay, per-update delta
//! cap). Every update, frozen no-ops included, lands in the append-only
//! audit log, and parameter sets are versioned: save deactivates the
//! previous row and inserts the next version.

pub mod adapters;
pub mod guardrails;
pub mod qupdate;
pub mod reward;

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use steward_storage::{AdaptiveStore, StorageError};
use steward_types::{
    AdaptiveAuditRow, AdaptiveParams, BUDGET_MULTIPLIER_RANGE, ESCALATION_DELTA_RANGE,
    PROVIDER_WEIGHT_RANGE,
};

pub use adapters::{EscalationThresholdAdapter, RouterPolicyAdapter};
pub use guardrails::{GuardrailVerdict, Guardrails};
pub use reward::{compute_reward, TaskOutcome};

#[derive(Debug, Error)]
pub enum ReinforcementError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The Reinforcement Loop. One instance per process; writes for one
/// (company, agent, task-class) key are serialized by the caller (one
/// update per task, and one agent's tasks run serially).
pub struct ReinforcementLoop {
    store: Arc<dyn AdaptiveStore>,
    guardrails: Guardrails,
}

impl ReinforcementLoop {
    pub fn new(store: Arc<dyn AdaptiveStore>) -> Self {
        Self {
            store,
            guardrails: Guardrails::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AdaptiveStore> {
        &self.store
    }

    /// Process one task outcome: compute the reward, run the guardrails,
    /// apply bounded updates, version the result and audit everything.
    ///
    /// Errors here never abort tasks; the post-task hook logs and moves on.
    pub async fn record_outcome(
        &self,
        outcome: &TaskOutcome,
    ) -> Result<AdaptiveParams, ReinforcementError> {
        let reward = compute_reward(outcome);

        let before = self
            .store
            .load_active(&outcome.company_id, &outcome.agent_id, &outcome.task_class)
            .await?
            .unwrap_or_else(|| {
                AdaptiveParams::defaults(
                    &outcome.company_id,
                    &outcome.agent_id,
                    &outcome.task_class,
                )
            });

        let key = before.key();
        let verdict =
            self.guardrails
                .observe(&key, reward.total, reward.outcome_delta, before.learning_rate);

        let mut after = before.clone();
        after.learning_rate = verdict.alpha;
        after.frozen = verdict.frozen;

        if verdict.frozen {
            tracing::warn!(
                %key,
                reason = verdict.freeze_reason.as_deref().unwrap_or(""),
                "adaptation frozen; update is a no-op"
            );
        } else {
            let alpha = verdict.alpha;
            let weight = after
                .provider_weights
                .entry(outcome.provider_id.clone())
                .or_insert(0.0);
            *weight = qupdate::step(*weight, reward.total, alpha, PROVIDER_WEIGHT_RANGE);

            after.escalation_threshold_delta = qupdate::step(
                after.escalation_threshold_delta,
                reward.total,
                alpha,
                ESCALATION_DELTA_RANGE,
            );
            // The budget multiplier tracks cost efficiency, not total reward.
            after.budget_multiplier = qupdate::step(
                after.budget_multiplier,
                reward.cost_efficiency,
                alpha,
                BUDGET_MULTIPLIER_RANGE,
            );
            after.update_count += 1;
        }

        // Persist a new version when anything moved or the freeze state
        // changed; a steady-state frozen no-op only audits.
        let state_changed = !verdict.frozen || before.frozen != after.frozen;
        if state_changed {
            let version = self.store.save_new_version(after.clone()).await?;
            after.version = version;
        }

        self.store
            .append_audit(AdaptiveAuditRow {
                id: Uuid::new_v4(),
                company_id: outcome.company_id.clone(),
                agent_id: outcome.agent_id.clone(),
                task_class: outcome.task_class.clone(),
                reward,
                params_before: before,
                params_after: after.clone(),
                alpha_used: verdict.alpha,
                frozen: verdict.frozen,
                freeze_reason: verdict.freeze_reason,
                created_at: Utc::now(),
            })
            .await?;

        Ok(after)
    }
}
