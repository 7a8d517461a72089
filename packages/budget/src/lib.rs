//! The Budget Engine.
//!
//! Rejects work that would exceed a per-task budget, the session ceiling,
//! or a rolling-hour rate limit. Checks run in that order and the first
//! failure short-circuits with a distinct reason. The cost ledger is
//! append-only; per-agent aggregates are maintained on record.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use steward_types::{estimate_dollars, CostRecord};

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("task budget exceeded: spent ${spent:.4} + estimate ${estimate:.4} > cap ${cap:.4}")]
    TaskCapExceeded { spent: f64, estimate: f64, cap: f64 },
    #[error("session ceiling exceeded: spent ${spent:.4} + estimate ${estimate:.4} > ceiling ${ceiling:.4}")]
    SessionCeilingExceeded {
        spent: f64,
        estimate: f64,
        ceiling: f64,
    },
    #[error("hourly cap exceeded: spent ${spent:.4} + estimate ${estimate:.4} > cap ${cap:.4} in the last hour")]
    HourlyCapExceeded { spent: f64, estimate: f64, cap: f64 },
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total spend allowed for the process session
    pub session_ceiling_dollars: f64,
    /// Spend allowed in any trailing hour
    pub hourly_cap_dollars: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            session_ceiling_dollars: 50.0,
            hourly_cap_dollars: 20.0,
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    /// Dollars left under the tightest surviving ceiling
    pub remaining_dollars: f64,
    pub reason: Option<String>,
}

/// Aggregate spend for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSpend {
    pub dollars: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
}

#[derive(Default)]
struct Ledger {
    records: Vec<CostRecord>,
    by_agent: HashMap<String, AgentSpend>,
}

/// The Budget Engine.
pub struct BudgetEngine {
    config: BudgetConfig,
    ledger: Mutex<Ledger>,
}

impl Default for BudgetEngine {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl BudgetEngine {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Dollar estimate for a call from the static price table.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        estimate_dollars(model, input_tokens, output_tokens)
    }

    /// Check a prospective spend. Order: task cap, session ceiling,
    /// rolling-hour cap; the first failure wins.
    pub fn check_budget(
        &self,
        task_id: &str,
        _agent_id: &str,
        task_cap_dollars: f64,
        estimate: f64,
    ) -> BudgetDecision {
        let ledger = self.ledger.lock();

        let task_spend: f64 = ledger
            .records
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| r.dollars)
            .sum();
        if task_spend + estimate > task_cap_dollars {
            return blocked(BudgetError::TaskCapExceeded {
                spent: task_spend,
                estimate,
                cap: task_cap_dollars,
            });
        }

        let session_spend: f64 = ledger.records.iter().map(|r| r.dollars).sum();
        if session_spend + estimate > self.config.session_ceiling_dollars {
            return blocked(BudgetError::SessionCeilingExceeded {
                spent: session_spend,
                estimate,
                ceiling: self.config.session_ceiling_dollars,
            });
        }

        let hour_ago = Utc::now() - ChronoDuration::seconds(3600);
        let hourly_spend: f64 = ledger
            .records
            .iter()
            .filter(|r| r.timestamp > hour_ago)
            .map(|r| r.dollars)
            .sum();
        if hourly_spend + estimate > self.config.hourly_cap_dollars {
            return blocked(BudgetError::HourlyCapExceeded {
                spent: hourly_spend,
                estimate,
                cap: self.config.hourly_cap_dollars,
            });
        }

        let remaining = (task_cap_dollars - task_spend - estimate)
            .min(self.config.session_ceiling_dollars - session_spend - estimate)
            .min(self.config.hourly_cap_dollars - hourly_spend - estimate);
        BudgetDecision {
            allowed: true,
            remaining_dollars: remaining,
            reason: None,
        }
    }

    /// Append a cost record and update the per-agent aggregate.
    pub fn record_cost(&self, record: CostRecord) {
        let mut ledger = self.ledger.lock();
        let agent = ledger.by_agent.entry(record.agent_id.clone()).or_default();
        agent.dollars += record.dollars;
        agent.input_tokens += record.input_tokens;
        agent.output_tokens += record.output_tokens;
        agent.calls += 1;
        ledger.records.push(record);
    }

    pub fn agent_spend(&self, agent_id: &str) -> AgentSpend {
        self.ledger
            .lock()
            .by_agent
            .get(agent_id)
            .copied()
            .unwrap_or_default()
    }

    /// Session-wide totals: (dollars, tokens).
    pub fn session_totals(&self) -> (f64, u64) {
        let ledger = self.ledger.lock();
        let dollars = ledger.records.iter().map(|r| r.dollars).sum();
        let tokens = ledger
            .records
            .iter()
            .map(|r| r.input_tokens + r.output_tokens)
            .sum();
        (dollars, tokens)
    }
}

fn blocked(error: BudgetError) -> BudgetDecision {
    BudgetDecision {
        allowed: false,
        remaining_dollars: 0.0,
        reason: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, dollars: f64) -> CostRecord {
        CostRecord::llm_call(task, "agent-1", 1000, 500, dollars)
    }

    #[test]
    fn task_cap_counts_prior_task_spend() {
        let engine = BudgetEngine::default();
        engine.record_cost(record("t1", 0.8));

        let decision = engine.check_budget("t1", "agent-1", 1.0, 0.3);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("task budget exceeded"));

        // A different task is unaffected by t1's spend.
        assert!(engine.check_budget("t2", "agent-1", 1.0, 0.3).allowed);
    }

    #[test]
    fn session_ceiling_blocks_any_positive_estimate_at_limit() {
        let engine = BudgetEngine::new(BudgetConfig {
            session_ceiling_dollars: 1.0,
            hourly_cap_dollars: 100.0,
        });
        engine.record_cost(record("t1", 1.0));

        // Exactly at the ceiling: zero-cost work still passes.
        assert!(engine.check_budget("t2", "agent-1", 10.0, 0.0).allowed);
        // Any positive estimate is blocked.
        let decision = engine.check_budget("t2", "agent-1", 10.0, 0.0001);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("session ceiling"));
    }

    #[test]
    fn hourly_cap_has_its_own_reason() {
        let engine = BudgetEngine::new(BudgetConfig {
            session_ceiling_dollars: 100.0,
            hourly_cap_dollars: 0.5,
        });
        engine.record_cost(record("t1", 0.5));

        let decision = engine.check_budget("t2", "agent-1", 10.0, 0.1);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("hourly cap"));
    }

    #[test]
    fn check_order_short_circuits_on_task_cap() {
        let engine = BudgetEngine::new(BudgetConfig {
            session_ceiling_dollars: 0.1,
            hourly_cap_dollars: 0.1,
        });
        engine.record_cost(record("t1", 5.0));

        // Both the session and hourly caps are blown, but the task cap is
        // checked first and names the task budget.
        let decision = engine.check_budget("t1", "agent-1", 1.0, 0.1);
        assert!(decision.reason.unwrap().contains("task budget exceeded"));
    }

    #[test]
    fn unknown_model_estimates_at_cheapest_rate() {
        let engine = BudgetEngine::default();
        let unknown = engine.estimate_cost("not-a-model", 1_000_000, 0);
        let cheapest = engine.estimate_cost("llama-3.3-70b-local", 1_000_000, 0);
        assert!((unknown - cheapest).abs() < 1e-12);
    }

    #[test]
    fn agent_aggregates_accumulate() {
        let engine = BudgetEngine::default();
        engine.record_cost(record("t1", 0.2));
        engine.record_cost(record("t2", 0.3));

        let spend = engine.agent_spend("agent-1");
        assert!((spend.dollars - 0.5).abs() < 1e-12);
        assert_eq!(spend.calls, 2);
        assert_eq!(spend.input_tokens, 2000);

        let (dollars, tokens) = engine.session_totals();
        assert!((dollars - 0.5).abs() < 1e-12);
        assert_eq!(tokens, 3000);
    }
}
