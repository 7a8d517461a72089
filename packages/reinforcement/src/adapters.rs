//! Thin decorators that consume the parameter store without modifying the
//! router or the Policy Engine. Learned deltas are applied on top of base
//! values; boot-locked policy is never referenced, let alone changed.

use std::sync::Arc;

use steward_router::{ProviderRegistry, TaskProfile};
use steward_storage::AdaptiveStore;

/// Bounds for the effective escalation threshold after the learned delta.
pub const EFFECTIVE_THRESHOLD_MIN: f64 = 0.30;
pub const EFFECTIVE_THRESHOLD_MAX: f64 = 0.95;

/// Provider selection informed by learned Q-values.
pub struct RouterPolicyAdapter {
    store: Arc<dyn AdaptiveStore>,
    registry: Arc<ProviderRegistry>,
}

impl RouterPolicyAdapter {
    pub fn new(store: Arc<dyn AdaptiveStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// The learned provider preference for a task, or `None` to defer to
    /// the base router: when the key is frozen, has no stored params, or
    /// has no positive Q-value for an eligible provider.
    pub async fn select_provider(
        &self,
        profile: &TaskProfile,
        company_id: &str,
        agent_id: &str,
    ) -> Option<String> {
        let params = self
            .store
            .load_active(company_id, agent_id, profile.class.as_str())
            .await
            .ok()??;
        if params.frozen {
            return None;
        }

        let mut best: Option<(String, f64)> = None;
        for (provider_id, weight) in &params.provider_weights {
            if *weight <= 0.0 {
                continue;
            }
            let Some(provider) = self.registry.get(provider_id) else {
                continue;
            };
            if profile.requires_local_only && !provider.local_only_capable() {
                continue;
            }
            if !provider.can_handle(profile) {
                continue;
            }
            if best.as_ref().is_none_or(|(_, w)| weight > w) {
                best = Some((provider_id.clone(), *weight));
            }
        }
        best.map(|(id, _)| id)
    }
}

/// Escalation threshold with the learned delta applied.
pub struct EscalationThresholdAdapter {
    store: Arc<dyn AdaptiveStore>,
}

impl EscalationThresholdAdapter {
    pub fn new(store: Arc<dyn AdaptiveStore>) -> Self {
        Self { store }
    }

    /// `clamp(base + delta, 0.30, 0.95)`, or `base` when the key is frozen
    /// or has no stored params.
    pub async fn effective_threshold(
        &self,
        base_threshold: f64,
        company_id: &str,
        agent_id: &str,
        task_class: &str,
    ) -> f64 {
        let Ok(Some(params)) = self.store.load_active(company_id, agent_id, task_class).await
        else {
            return base_threshold;
        };
        if params.frozen {
            return base_threshold;
        }
        (base_threshold + params.escalation_threshold_delta)
            .clamp(EFFECTIVE_THRESHOLD_MIN, EFFECTIVE_THRESHOLD_MAX)
    }
}
