//! Shared application state for the ingress surface.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use steward_orchestrator::Orchestrator;
use steward_policy::PolicyEngine;
use steward_storage::{ApprovalQueueStore, MemoryStore};
use steward_vault::CredentialVault;

use crate::logs::LogBuffer;
use crate::metrics::RuntimeMetrics;
use crate::skills::SkillRegistry;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub policy: Arc<PolicyEngine>,
    pub approval_queue: Arc<dyn ApprovalQueueStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub skills: Arc<SkillRegistry>,
    pub logs: Arc<LogBuffer>,
    pub metrics: Arc<RuntimeMetrics>,
    /// Key proxy for capability adapters; `None` without a master key
    pub vault: Option<Arc<CredentialVault>>,
    pub started_at: Instant,
    pub model: String,
    /// Flipping to true drains the serve loop
    pub shutdown: watch::Sender<bool>,
}

pub type SharedState = Arc<AppState>;
