//! Non-bypassable adaptation guardrails.
//!
//! - **Volatility freeze**: a 10-sample rolling reward history per
//!   (agent, task-class) key; variance above 0.6 (minimum 5 samples)
//!   freezes adaptation for the key until volatility subsides.
//! - **α-decay**: five consecutive negative outcome components halve the
//!   learning rate (floor 0.001) and reset the counter.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Rolling history length.
const HISTORY_LEN: usize = 10;
/// Samples required before variance can freeze.
const MIN_SAMPLES: usize = 5;
/// Variance above which a key freezes.
const VARIANCE_FREEZE_THRESHOLD: f64 = 0.6;
/// Negative outcome streak that triggers α-decay.
const DECAY_STREAK: u32 = 5;
/// Learning-rate floor.
const ALPHA_FLOOR: f64 = 0.001;

#[derive(Debug, Default)]
struct KeyState {
    rewards: VecDeque<f64>,
    negative_outcome_streak: u32,
}

/// Verdict for one update.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailVerdict {
    pub frozen: bool,
    pub freeze_reason: Option<String>,
    /// Learning rate after any decay
    pub alpha: f64,
    pub alpha_decayed: bool,
}

/// Tracks per-key reward history and drop streaks.
#[derive(Default)]
pub struct Guardrails {
    keys: Mutex<HashMap<String, KeyState>>,
}

impl Guardrails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one reward and decide whether this update may proceed.
    pub fn observe(
        &self,
        key: &str,
        reward_total: f64,
        outcome_component: f64,
        current_alpha: f64,
    ) -> GuardrailVerdict {
        let mut keys = self.keys.lock();
        let state = keys.entry(key.to_string()).or_default();

        state.rewards.push_back(reward_total);
        while state.rewards.len() > HISTORY_LEN {
            state.rewards.pop_front();
        }

        let variance = variance(&state.rewards);
        let frozen = state.rewards.len() >= MIN_SAMPLES && variance > VARIANCE_FREEZE_THRESHOLD;
        let freeze_reason = frozen.then(|| {
            format!(
                "reward variance {variance:.3} over {} samples exceeds {VARIANCE_FREEZE_THRESHOLD}",
                state.rewards.len()
            )
        });

        let mut alpha = current_alpha;
        let mut alpha_decayed = false;
        if outcome_component < 0.0 {
            state.negative_outcome_streak += 1;
            if state.negative_outcome_streak >= DECAY_STREAK {
                alpha = (alpha / 2.0).max(ALPHA_FLOOR);
                alpha_decayed = true;
                state.negative_outcome_streak = 0;
            }
        } else {
            state.negative_outcome_streak = 0;
        }

        GuardrailVerdict {
            frozen,
            freeze_reason,
            alpha,
            alpha_decayed,
        }
    }
}

fn variance(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_rewards_do_not_freeze() {
        let rails = Guardrails::new();
        for _ in 0..10 {
            let verdict = rails.observe("k", 0.3, 0.5, 0.05);
            assert!(!verdict.frozen);
        }
    }

    #[test]
    fn oscillating_rewards_freeze_after_min_samples() {
        let rails = Guardrails::new();
        let mut verdicts = Vec::new();
        for i in 0..6 {
            let reward = if i % 2 == 0 { 1.0 } else { -1.0 };
            verdicts.push(rails.observe("k", reward, 0.5, 0.05));
        }
        // Fewer than five samples can never freeze.
        assert!(verdicts[..4].iter().all(|v| !v.frozen));
        // Variance of alternating ±1 is 1.0 > 0.6.
        assert!(verdicts[5].frozen);
        assert!(verdicts[5].freeze_reason.as_ref().unwrap().contains("variance"));
    }

    #[test]
    fn five_negative_outcomes_halve_alpha_once() {
        let rails = Guardrails::new();
        let mut alpha = 0.05;
        for i in 0..5 {
            let verdict = rails.observe("k", 0.0, -0.5, alpha);
            alpha = verdict.alpha;
            if i < 4 {
                assert!(!verdict.alpha_decayed);
            } else {
                assert!(verdict.alpha_decayed);
            }
        }
        assert!((alpha - 0.025).abs() < 1e-12);

        // Streak reset: the next negative observation does not decay again.
        let verdict = rails.observe("k", 0.0, -0.5, alpha);
        assert!(!verdict.alpha_decayed);
    }

    #[test]
    fn alpha_never_drops_below_floor() {
        let rails = Guardrails::new();
        let mut alpha = 0.002;
        for _ in 0..20 {
            alpha = rails.observe("k", 0.0, -0.5, alpha).alpha;
        }
        assert!(alpha >= ALPHA_FLOOR);
    }

    #[test]
    fn positive_outcome_resets_streak() {
        let rails = Guardrails::new();
        for _ in 0..4 {
            rails.observe("k", 0.0, -0.5, 0.05);
        }
        rails.observe("k", 0.0, 0.5, 0.05);
        // Four more negatives: still under the streak.
        for _ in 0..4 {
            let verdict = rails.observe("k", 0.0, -0.5, 0.05);
            assert!(!verdict.alpha_decayed);
        }
    }
}
