//! The provider capability set and the registry that selects one.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use steward_types::{
    CompletionOptions, CompletionResult, CostEstimate, ProviderHealth, TaggedMessage,
};

use crate::classify::{TaskClass, TaskProfile};
use crate::RouterError;

/// A completion provider: id, capability checks, cost estimation and the
/// completion call itself.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    /// Whether the provider can run the given task profile.
    fn can_handle(&self, profile: &TaskProfile) -> bool;

    /// Whether the provider keeps content on local infrastructure.
    fn local_only_capable(&self) -> bool {
        false
    }

    /// Pre-flight estimate for a prompt of `prompt_chars` and up to
    /// `max_tokens` of output.
    fn estimate_cost(&self, prompt_chars: usize, max_tokens: u32) -> CostEstimate;

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[TaggedMessage],
        options: &CompletionOptions,
    ) -> Result<CompletionResult, RouterError>;

    fn health(&self) -> ProviderHealth {
        ProviderHealth::healthy()
    }
}

/// Registry of providers in registration order, plus routing rules keyed by
/// task class.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn CompletionProvider>>>,
    rules: RwLock<HashMap<TaskClass, String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn CompletionProvider>) {
        tracing::info!(provider_id = provider.id(), "provider registered");
        self.providers.write().push(provider);
    }

    /// Prefer `provider_id` for tasks classified as `class`.
    pub fn set_rule(&self, class: TaskClass, provider_id: impl Into<String>) {
        self.rules.write().insert(class, provider_id.into());
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers
            .read()
            .iter()
            .find(|p| p.id() == provider_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn CompletionProvider>> {
        self.providers.read().clone()
    }

    /// Select a provider: the routing rule's preference when it can handle
    /// the task, else the first registered provider that can, else the
    /// first registered provider. A local-only requirement filters every
    /// step; content classified sensitive never leaves local
    /// infrastructure.
    pub fn select(&self, profile: &TaskProfile) -> Result<Arc<dyn CompletionProvider>, RouterError> {
        let providers = self.providers.read();
        if providers.is_empty() {
            return Err(RouterError::NoProvider);
        }
        let eligible = |p: &Arc<dyn CompletionProvider>| {
            !profile.requires_local_only || p.local_only_capable()
        };

        if let Some(preferred_id) = self.rules.read().get(&profile.class) {
            if let Some(provider) = providers
                .iter()
                .find(|p| p.id() == preferred_id && eligible(p) && p.can_handle(profile))
            {
                return Ok(provider.clone());
            }
        }

        if let Some(provider) = providers
            .iter()
            .find(|p| eligible(p) && p.can_handle(profile))
        {
            return Ok(provider.clone());
        }

        providers
            .iter()
            .find(|p| eligible(p))
            .cloned()
            .ok_or(RouterError::NoLocalProvider)
    }
}
