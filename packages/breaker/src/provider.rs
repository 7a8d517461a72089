//! Per-provider health over a rolling call window.
//!
//! Transitions:
//!
//! | from      | condition                                        | to        |
//! |-----------|--------------------------------------------------|-----------|
//! | closed    | error rate >= 50% or p99 >= 30s over >= 5 samples | open      |
//! | open      | recovery delay elapsed                            | half-open |
//! | half-open | next recorded call succeeded                      | closed    |
//! | half-open | next recorded call failed                         | open      |

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Breaker state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// One recorded provider call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
}

/// Tunables for provider health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthConfig {
    /// Rolling window length
    pub window_secs: u64,
    /// Minimum samples before the window can open the breaker
    pub min_samples: usize,
    /// Error rate at or above which the breaker opens
    pub error_rate_threshold: f64,
    /// p99 latency at or above which the breaker opens
    pub p99_latency_ms: u64,
    /// Time in open before a probe is allowed
    pub recovery_delay_secs: u64,
}

impl Default for ProviderHealthConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            min_samples: 5,
            error_rate_threshold: 0.5,
            p99_latency_ms: 30_000,
            recovery_delay_secs: 30,
        }
    }
}

/// Rolling-window health for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub provider_id: String,
    pub state: ProviderBreakerState,
    pub calls: VecDeque<CallRecord>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl ProviderState {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: ProviderBreakerState::Closed,
            calls: VecDeque::new(),
            opened_at: None,
            last_probe_at: None,
        }
    }

    /// Promote open → half-open once the recovery delay has elapsed.
    pub fn refresh(&mut self, config: &ProviderHealthConfig, now: DateTime<Utc>) {
        if self.state == ProviderBreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if now - opened_at >= ChronoDuration::seconds(config.recovery_delay_secs as i64) {
                    self.state = ProviderBreakerState::HalfOpen;
                }
            }
        }
    }

    /// Record one call and apply transitions.
    pub fn record(&mut self, config: &ProviderHealthConfig, latency_ms: u64, success: bool) {
        let now = Utc::now();
        self.refresh(config, now);

        self.calls.push_back(CallRecord {
            timestamp: now,
            latency_ms,
            success,
        });
        self.prune(config, now);

        match self.state {
            ProviderBreakerState::HalfOpen => {
                self.last_probe_at = Some(now);
                if success {
                    self.state = ProviderBreakerState::Closed;
                    self.opened_at = None;
                } else {
                    self.state = ProviderBreakerState::Open;
                    self.opened_at = Some(now);
                }
            }
            ProviderBreakerState::Closed => {
                if self.window_is_unhealthy(config) {
                    self.state = ProviderBreakerState::Open;
                    self.opened_at = Some(now);
                }
            }
            ProviderBreakerState::Open => {}
        }
    }

    fn prune(&mut self, config: &ProviderHealthConfig, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(config.window_secs as i64);
        while self.calls.front().is_some_and(|c| c.timestamp < cutoff) {
            self.calls.pop_front();
        }
    }

    fn window_is_unhealthy(&self, config: &ProviderHealthConfig) -> bool {
        if self.calls.len() < config.min_samples {
            return false;
        }
        let failures = self.calls.iter().filter(|c| !c.success).count();
        let error_rate = failures as f64 / self.calls.len() as f64;
        if error_rate >= config.error_rate_threshold {
            return true;
        }
        self.p99_latency_ms() >= config.p99_latency_ms
    }

    fn p99_latency_ms(&self) -> u64 {
        if self.calls.is_empty() {
            return 0;
        }
        let mut latencies: Vec<u64> = self.calls.iter().map(|c| c.latency_ms).collect();
        latencies.sort_unstable();
        let rank = ((latencies.len() as f64) * 0.99).ceil() as usize;
        latencies[rank.saturating_sub(1).min(latencies.len() - 1)]
    }

    /// Healthy means anything but open (a half-open provider accepts a
    /// probe call).
    pub fn is_healthy(&self, config: &ProviderHealthConfig, now: DateTime<Utc>) -> bool {
        let mut probe = self.clone();
        probe.refresh(config, now);
        probe.state != ProviderBreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderHealthConfig {
        ProviderHealthConfig::default()
    }

    #[test]
    fn four_failures_stay_closed_five_open() {
        let cfg = config();
        let mut state = ProviderState::new("p");
        for _ in 0..4 {
            state.record(&cfg, 100, false);
        }
        assert_eq!(state.state, ProviderBreakerState::Closed);

        state.record(&cfg, 100, false);
        assert_eq!(state.state, ProviderBreakerState::Open);
        assert!(state.opened_at.is_some());
    }

    #[test]
    fn healthy_window_stays_closed() {
        let cfg = config();
        let mut state = ProviderState::new("p");
        for _ in 0..20 {
            state.record(&cfg, 500, true);
        }
        assert_eq!(state.state, ProviderBreakerState::Closed);
    }

    #[test]
    fn slow_p99_opens() {
        let cfg = config();
        let mut state = ProviderState::new("p");
        for _ in 0..5 {
            state.record(&cfg, 35_000, true);
        }
        assert_eq!(state.state, ProviderBreakerState::Open);
    }

    #[test]
    fn open_promotes_to_half_open_after_recovery_delay() {
        let cfg = config();
        let mut state = ProviderState::new("p");
        for _ in 0..5 {
            state.record(&cfg, 100, false);
        }
        assert_eq!(state.state, ProviderBreakerState::Open);

        // Backdate the open so the recovery delay has elapsed.
        state.opened_at = Some(Utc::now() - ChronoDuration::seconds(31));
        state.refresh(&cfg, Utc::now());
        assert_eq!(state.state, ProviderBreakerState::HalfOpen);
    }

    #[test]
    fn half_open_probe_success_closes_failure_reopens() {
        let cfg = config();
        let mut state = ProviderState::new("p");
        state.state = ProviderBreakerState::HalfOpen;
        state.record(&cfg, 100, true);
        assert_eq!(state.state, ProviderBreakerState::Closed);

        let mut state = ProviderState::new("p");
        state.state = ProviderBreakerState::HalfOpen;
        state.record(&cfg, 100, false);
        assert_eq!(state.state, ProviderBreakerState::Open);
    }
}
