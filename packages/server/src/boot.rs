//! Boot sequence: storage selection, policy lock, engine wiring, workers,
//! heartbeat. A failure anywhere here exits the process non-zero.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use steward_approval::{ApprovalConfig, ApprovalGate, HttpTrainingClient, TrainingSink};
use steward_breaker::{BreakerConfig, CircuitBreaker, ProviderHealthConfig};
use steward_budget::{BudgetConfig, BudgetEngine};
use steward_orchestrator::{
    CompanyProfile, EngineSet, NoopToolExecutor, Orchestrator, OrchestratorConfig, StoreSet,
};
use steward_policy::PolicyEngine;
use steward_reinforcement::ReinforcementLoop;
use steward_router::{
    HttpCompletionProvider, HttpProviderConfig, LlmRouter, ProviderRegistry,
};
use steward_storage::mem::{
    MemoryActiveContextStore, MemoryAdaptiveStore, MemoryApprovalQueue, MemoryDecisionLog,
    MemoryKnowledgeGraph, MemoryKvStore, MemoryMemoryStore, MemoryTaskStore, MemoryTelemetryStore,
};
use steward_storage::{
    AdaptiveStore, ApprovalQueueStore, DecisionLogStore, TelemetryStore,
};
use steward_types::{ConfidenceAction, ConfidenceRange, Constraint, Trigger};
use steward_vault::CredentialVault;

use crate::config::RuntimeConfig;
use crate::logs::LogBuffer;
use crate::metrics::{BufferedTelemetry, CountingTelemetry, RuntimeMetrics};
use crate::skills::SkillRegistry;
use crate::state::{AppState, SharedState};

/// Boot policy file shape (`STEWARD_POLICY_PATH`).
#[derive(Debug, Default, Deserialize)]
struct BootPolicy {
    #[serde(default)]
    constraints: Vec<Constraint>,
    #[serde(default)]
    triggers: Vec<Trigger>,
    #[serde(default)]
    confidence_map: Vec<ConfidenceRange>,
    #[serde(default)]
    version: u32,
}

fn default_confidence_map() -> Vec<ConfidenceRange> {
    vec![
        ConfidenceRange::new(0.0, 0.5, ConfidenceAction::Escalate),
        ConfidenceRange::new(0.5, 0.8, ConfidenceAction::SlowDown),
        ConfidenceRange::new(0.8, 1.0, ConfidenceAction::Act),
    ]
}

/// Assemble the full runtime. `logs` is the buffer the tracing layer
/// already writes into, so the API serves the same stream the process
/// logs. Returns the shared state and the background task handles
/// (workers, heartbeat).
pub async fn build_runtime(
    config: RuntimeConfig,
    logs: Arc<LogBuffer>,
) -> anyhow::Result<(SharedState, Vec<JoinHandle<()>>)> {
    // Storage backends: durable where configured, in-memory otherwise.
    let approval_queue: Arc<dyn ApprovalQueueStore>;
    let telemetry_inner: Arc<dyn TelemetryStore>;
    let adaptive: Arc<dyn AdaptiveStore>;
    let decisions: Arc<dyn DecisionLogStore>;

    #[cfg(feature = "sql")]
    if let Some(database_url) = &config.database_url {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        steward_storage::sql::migrate(&pool)
            .await
            .context("running storage migrations")?;
        approval_queue = Arc::new(steward_storage::sql::SqliteApprovalQueue::new(pool.clone()));
        telemetry_inner = Arc::new(steward_storage::sql::SqliteTelemetryStore::new(pool.clone()));
        adaptive = Arc::new(steward_storage::sql::SqliteAdaptiveStore::new(pool.clone()));
        decisions = Arc::new(steward_storage::sql::SqliteDecisionLog::new(pool));
        tracing::info!(%database_url, "durable storage online");
    } else {
        approval_queue = Arc::new(MemoryApprovalQueue::new());
        telemetry_inner = Arc::new(MemoryTelemetryStore::new());
        adaptive = Arc::new(MemoryAdaptiveStore::new());
        decisions = Arc::new(MemoryDecisionLog::new());
        tracing::warn!("no database configured; durable stores are in-memory");
    }
    #[cfg(not(feature = "sql"))]
    {
        approval_queue = Arc::new(MemoryApprovalQueue::new());
        telemetry_inner = Arc::new(MemoryTelemetryStore::new());
        adaptive = Arc::new(MemoryAdaptiveStore::new());
        decisions = Arc::new(MemoryDecisionLog::new());
    }

    // Policy lock. A missing file is fatal: booting an agent without its
    // policy would run it unconstrained.
    let policy = Arc::new(PolicyEngine::new());
    let boot_policy = match &config.policy_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy file {path}"))?;
            serde_json::from_str::<BootPolicy>(&raw)
                .with_context(|| format!("parsing policy file {path}"))?
        }
        None => {
            tracing::warn!("no policy file configured; booting with empty constraint set");
            BootPolicy::default()
        }
    };
    let confidence_map = if boot_policy.confidence_map.is_empty() {
        default_confidence_map()
    } else {
        boot_policy.confidence_map
    };
    policy
        .boot(
            boot_policy.constraints,
            boot_policy.triggers,
            confidence_map,
            boot_policy.version,
        )
        .context("locking boot policy")?;

    // Credential vault; the provider key lives behind it for adapters.
    let vault = match &config.master_key {
        Some(master_key) => {
            let vault = CredentialVault::new(master_key.clone()).context("initializing vault")?;
            Some(Arc::new(vault))
        }
        None => None,
    };
    if let (Some(vault), Some(key)) = (&vault, &config.provider_api_key) {
        vault.store("llm-provider", key.clone());
    }

    // Providers.
    let registry = Arc::new(ProviderRegistry::new());
    match (&config.provider_base_url, &config.provider_api_key) {
        (Some(base_url), Some(api_key)) => {
            registry.register(Arc::new(HttpCompletionProvider::new(HttpProviderConfig {
                id: "primary".into(),
                name: "primary chat-completions endpoint".into(),
                base_url: base_url.clone(),
                api_key: api_key.clone(),
                model: config.provider_model.clone(),
                local_only_capable: base_url.contains("localhost")
                    || base_url.contains("127.0.0.1"),
                timeout: Duration::from_secs(120),
            })));
        }
        _ => {
            tracing::warn!("no provider configured; completion calls will fail to route");
        }
    }
    let router = Arc::new(LlmRouter::new(policy.clone(), registry));

    // Engines.
    let training: Option<Arc<dyn TrainingSink>> = config
        .training_url
        .as_ref()
        .map(|url| Arc::new(HttpTrainingClient::new(url.clone())) as Arc<dyn TrainingSink>);
    let approval = Arc::new(ApprovalGate::new(
        ApprovalConfig::default()
            .with_timeout(config.approval_timeout)
            .with_timeout_action(config.approval_timeout_action),
        approval_queue.clone(),
        training,
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        BreakerConfig::default().with_max_iterations(config.max_iterations),
        ProviderHealthConfig::default(),
    ));
    let budget = Arc::new(BudgetEngine::new(BudgetConfig {
        session_ceiling_dollars: config.session_ceiling_dollars,
        hourly_cap_dollars: config.hourly_cap_dollars,
    }));
    let reinforcement = Arc::new(ReinforcementLoop::new(adaptive));

    let metrics = RuntimeMetrics::new();
    let telemetry_buffer = BufferedTelemetry::new(telemetry_inner);
    let telemetry = CountingTelemetry::new(telemetry_buffer.clone(), metrics.clone());
    let memory = Arc::new(MemoryMemoryStore::new());

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            agent_id: config.agent_id.clone(),
            company_id: config.company_id.clone(),
            worker_concurrency: config.worker_concurrency,
            base_task_cap_dollars: config.base_task_cap_dollars,
            default_allowed_adapters: HashSet::new(),
            company: CompanyProfile {
                goal: config.company_goal.clone(),
                ..CompanyProfile::default()
            },
            ..OrchestratorConfig::default()
        },
        EngineSet {
            policy: policy.clone(),
            budget,
            breaker: breaker.clone(),
            approval,
            router,
            reinforcement,
            tools: Arc::new(NoopToolExecutor),
        },
        StoreSet {
            kv: Arc::new(MemoryKvStore::new()),
            telemetry,
            decisions,
            active_context: Arc::new(MemoryActiveContextStore::new()),
            knowledge: Arc::new(MemoryKnowledgeGraph::new()),
            tasks: Arc::new(MemoryTaskStore::new()),
        },
    );

    let mut handles = orchestrator.clone().spawn_workers();
    handles.push(spawn_heartbeat(orchestrator.clone(), breaker));
    handles.push(telemetry_buffer.clone().spawn_flusher(Duration::from_secs(10)));

    let (shutdown, _) = watch::channel(false);
    let state = Arc::new(AppState {
        orchestrator,
        policy,
        approval_queue,
        memory,
        skills: Arc::new(SkillRegistry::new()),
        logs,
        metrics,
        vault,
        started_at: std::time::Instant::now(),
        model: config.provider_model,
        shutdown,
    });
    Ok((state, handles))
}

/// Periodic liveness log with provider breaker states.
fn spawn_heartbeat(
    orchestrator: Arc<Orchestrator>,
    breaker: Arc<CircuitBreaker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let active = orchestrator.active_task_ids().await.len();
            let providers = breaker.provider_states();
            tracing::info!(active_tasks = active, providers = ?providers, "heartbeat");
        }
    })
}
