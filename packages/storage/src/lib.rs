//! Storage interface the Steward core consumes.
//!
//! The durable backend is an external collaborator; the core talks to it
//! through these traits only. In-memory implementations ship
//! unconditionally and back the test suite; SQLite implementations live
//! behind the `sql` feature.
//!
//! Post-task writes follow the propagation policy of the error design:
//! storage failures on background paths are logged and skipped, never
//! allowed to abort a task.

pub mod mem;
#[cfg(feature = "sql")]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use steward_types::{
    ActiveContextSnapshot, AdaptiveAuditRow, AdaptiveParams, ApprovalRow, ApprovalStatus,
    CoreMemoryRecord, DecisionLogEntry, KnowledgeEdge, KnowledgeNode, TaskStatus, TelemetryEvent,
};

/// Storage failure. Background consumers log-and-skip; pipeline consumers
/// surface `Unavailable` as a task abort.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "sql")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Shared key/value store with TTL, used for halt signals.
///
/// Values are opaque strings; callers own serialization so that a
/// corrupted record can be detected and self-healed on read.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StorageResult<()>;
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    /// Keys under a prefix, expired entries excluded.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Durable approval queue.
#[async_trait]
pub trait ApprovalQueueStore: Send + Sync {
    async fn insert(&self, row: ApprovalRow) -> StorageResult<()>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<ApprovalRow>>;
    /// Resolve a pending row. No-op if already resolved.
    async fn resolve(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        reason: Option<String>,
        correction: Option<String>,
    ) -> StorageResult<()>;
    async fn mark_correction_incorporated(&self, id: Uuid) -> StorageResult<()>;
    /// The oldest pending row for a task, if any.
    async fn pending_for_task(&self, task_id: &str) -> StorageResult<Option<ApprovalRow>>;
    async fn list_pending(&self) -> StorageResult<Vec<ApprovalRow>>;
}

/// Append-only telemetry log.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append(&self, event: TelemetryEvent) -> StorageResult<()>;
    async fn recent(&self, limit: usize) -> StorageResult<Vec<TelemetryEvent>>;
}

/// Versioned adaptive-parameter store plus its append-only audit log.
#[async_trait]
pub trait AdaptiveStore: Send + Sync {
    /// Most recent active version for a key, or `None`.
    async fn load_active(
        &self,
        company_id: &str,
        agent_id: &str,
        task_class: &str,
    ) -> StorageResult<Option<AdaptiveParams>>;
    /// Deactivate the previous active row and insert `params` with a
    /// monotonically increased version. Returns the stored version.
    async fn save_new_version(&self, params: AdaptiveParams) -> StorageResult<u32>;
    async fn append_audit(&self, row: AdaptiveAuditRow) -> StorageResult<()>;
    async fn audit_rows(&self, limit: usize) -> StorageResult<Vec<AdaptiveAuditRow>>;
}

/// Append-only decision log.
#[async_trait]
pub trait DecisionLogStore: Send + Sync {
    async fn append(&self, entry: DecisionLogEntry) -> StorageResult<()>;
    async fn recent(&self, limit: usize) -> StorageResult<Vec<DecisionLogEntry>>;
}

/// Persistent active context per company.
#[async_trait]
pub trait ActiveContextStore: Send + Sync {
    async fn load(&self, company_id: &str) -> StorageResult<ActiveContextSnapshot>;
    async fn save(&self, company_id: &str, snapshot: ActiveContextSnapshot) -> StorageResult<()>;
    async fn add_in_flight(&self, company_id: &str, task_id: &str) -> StorageResult<()>;
    async fn remove_in_flight(&self, company_id: &str, task_id: &str) -> StorageResult<()>;
}

/// Core memory served by `/api/memory`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, record: CoreMemoryRecord) -> StorageResult<()>;
    async fn search(
        &self,
        query: Option<&str>,
        kind: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<CoreMemoryRecord>>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<CoreMemoryRecord>>;
    async fn delete(&self, id: Uuid) -> StorageResult<bool>;
}

/// Knowledge graph backed by `kg_nodes` / `kg_edges`. Edges may form
/// cycles; implementations traverse with a visited set.
#[async_trait]
pub trait KnowledgeGraphStore: Send + Sync {
    async fn add_node(&self, node: KnowledgeNode) -> StorageResult<()>;
    async fn add_edge(&self, edge: KnowledgeEdge) -> StorageResult<()>;
    /// Excerpts reachable from nodes matching `goal`, capped.
    async fn excerpts_for(&self, goal: &str, cap: usize) -> StorageResult<Vec<String>>;
}

/// Task rows mirrored for the status surface.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub task_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn upsert(&self, row: TaskRow) -> StorageResult<()>;
    async fn get(&self, task_id: &str) -> StorageResult<Option<TaskRow>>;
    async fn active(&self) -> StorageResult<Vec<TaskRow>>;
}
