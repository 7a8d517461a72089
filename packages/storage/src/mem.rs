//! In-memory implementations of every storage trait.
//!
//! These back the test suite and single-process deployments. Maps are held
//! behind `tokio::sync::RwLock` so the worker pool can run at concurrency
//! greater than one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use steward_types::{
    ActiveContextSnapshot, AdaptiveAuditRow, AdaptiveParams, ApprovalRow, ApprovalStatus,
    CoreMemoryRecord, DecisionLogEntry, KnowledgeEdge, KnowledgeNode, TelemetryEvent,
};

use crate::{
    ActiveContextStore, AdaptiveStore, ApprovalQueueStore, DecisionLogStore, KnowledgeGraphStore,
    KvStore, MemoryStore, StorageResult, TaskRow, TaskStore, TelemetryStore,
};

/// Value plus optional expiry.
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory KV store with TTL.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StorageResult<()> {
        let entry = KvEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        // Expired entries are removed on read rather than by a sweeper.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.is_expired());
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// In-memory approval queue.
#[derive(Default)]
pub struct MemoryApprovalQueue {
    rows: RwLock<HashMap<Uuid, ApprovalRow>>,
}

impl MemoryApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row for a task regardless of status, oldest first. Test
    /// helper.
    pub async fn all_for_task(&self, task_id: &str) -> Vec<ApprovalRow> {
        let rows = self.rows.read().await;
        let mut out: Vec<_> = rows
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}

#[async_trait]
impl ApprovalQueueStore for MemoryApprovalQueue {
    async fn insert(&self, row: ApprovalRow) -> StorageResult<()> {
        self.rows.write().await.insert(row.id, row);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<ApprovalRow>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn resolve(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        reason: Option<String>,
        correction: Option<String>,
    ) -> StorageResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(&id) {
            if row.status == ApprovalStatus::Pending {
                row.status = status;
                row.resolved_by = Some(resolved_by.to_string());
                row.resolved_at = Some(Utc::now());
                if let Some(reason) = reason {
                    row.reason = reason;
                }
                if correction.is_some() {
                    row.correction = correction;
                }
            }
        }
        Ok(())
    }

    async fn mark_correction_incorporated(&self, id: Uuid) -> StorageResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(&id) {
            row.correction_incorporated = true;
        }
        Ok(())
    }

    async fn pending_for_task(&self, task_id: &str) -> StorageResult<Option<ApprovalRow>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<_> = rows
            .values()
            .filter(|r| r.task_id == task_id && r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending.into_iter().next())
    }

    async fn list_pending(&self) -> StorageResult<Vec<ApprovalRow>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<_> = rows
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}

/// In-memory append-only telemetry log.
#[derive(Default)]
pub struct MemoryTelemetryStore {
    events: RwLock<Vec<TelemetryEvent>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first. Test helper.
    pub async fn all(&self) -> Vec<TelemetryEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn append(&self, event: TelemetryEvent) -> StorageResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<TelemetryEvent>> {
        let events = self.events.read().await;
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].to_vec())
    }
}

/// In-memory versioned adaptive store with audit log.
#[derive(Default)]
pub struct MemoryAdaptiveStore {
    /// key → versions, newest last; only the last is active
    versions: RwLock<HashMap<String, Vec<AdaptiveParams>>>,
    audit: RwLock<Vec<AdaptiveAuditRow>>,
}

impl MemoryAdaptiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every retained version for a key, oldest first. Test helper.
    pub async fn history(&self, key: &str) -> Vec<AdaptiveParams> {
        self.versions
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AdaptiveStore for MemoryAdaptiveStore {
    async fn load_active(
        &self,
        company_id: &str,
        agent_id: &str,
        task_class: &str,
    ) -> StorageResult<Option<AdaptiveParams>> {
        let key = format!("{company_id}:{agent_id}:{task_class}");
        Ok(self
            .versions
            .read()
            .await
            .get(&key)
            .and_then(|v| v.last().cloned()))
    }

    async fn save_new_version(&self, mut params: AdaptiveParams) -> StorageResult<u32> {
        let mut versions = self.versions.write().await;
        let entry = versions.entry(params.key()).or_default();
        let next_version = entry.last().map(|p| p.version + 1).unwrap_or(1);
        params.version = next_version;
        entry.push(params);
        Ok(next_version)
    }

    async fn append_audit(&self, row: AdaptiveAuditRow) -> StorageResult<()> {
        self.audit.write().await.push(row);
        Ok(())
    }

    async fn audit_rows(&self, limit: usize) -> StorageResult<Vec<AdaptiveAuditRow>> {
        let audit = self.audit.read().await;
        let start = audit.len().saturating_sub(limit);
        Ok(audit[start..].to_vec())
    }
}

/// In-memory decision log.
#[derive(Default)]
pub struct MemoryDecisionLog {
    entries: RwLock<Vec<DecisionLogEntry>>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionLogStore for MemoryDecisionLog {
    async fn append(&self, entry: DecisionLogEntry) -> StorageResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<DecisionLogEntry>> {
        let entries = self.entries.read().await;
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

/// In-memory active-context store.
#[derive(Default)]
pub struct MemoryActiveContextStore {
    contexts: RwLock<HashMap<String, ActiveContextSnapshot>>,
}

impl MemoryActiveContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActiveContextStore for MemoryActiveContextStore {
    async fn load(&self, company_id: &str) -> StorageResult<ActiveContextSnapshot> {
        Ok(self
            .contexts
            .read()
            .await
            .get(company_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, company_id: &str, snapshot: ActiveContextSnapshot) -> StorageResult<()> {
        self.contexts
            .write()
            .await
            .insert(company_id.to_string(), snapshot);
        Ok(())
    }

    async fn add_in_flight(&self, company_id: &str, task_id: &str) -> StorageResult<()> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts.entry(company_id.to_string()).or_default();
        if !ctx.in_flight.iter().any(|t| t == task_id) {
            ctx.in_flight.push(task_id.to_string());
        }
        Ok(())
    }

    async fn remove_in_flight(&self, company_id: &str, task_id: &str) -> StorageResult<()> {
        let mut contexts = self.contexts.write().await;
        if let Some(ctx) = contexts.get_mut(company_id) {
            ctx.in_flight.retain(|t| t != task_id);
        }
        Ok(())
    }
}

/// In-memory core-memory store.
#[derive(Default)]
pub struct MemoryMemoryStore {
    records: RwLock<Vec<CoreMemoryRecord>>,
}

impl MemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for MemoryMemoryStore {
    async fn insert(&self, record: CoreMemoryRecord) -> StorageResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn search(
        &self,
        query: Option<&str>,
        kind: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<CoreMemoryRecord>> {
        let records = self.records.read().await;
        let query_lower = query.map(str::to_lowercase);
        Ok(records
            .iter()
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .filter(|r| {
                query_lower
                    .as_deref()
                    .is_none_or(|q| r.content.to_lowercase().contains(q))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<CoreMemoryRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}

/// In-memory knowledge graph over `kg_nodes` / `kg_edges`.
#[derive(Default)]
pub struct MemoryKnowledgeGraph {
    nodes: RwLock<HashMap<String, KnowledgeNode>>,
    edges: RwLock<Vec<KnowledgeEdge>>,
}

impl MemoryKnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeGraphStore for MemoryKnowledgeGraph {
    async fn add_node(&self, node: KnowledgeNode) -> StorageResult<()> {
        self.nodes.write().await.insert(node.id.clone(), node);
        Ok(())
    }

    async fn add_edge(&self, edge: KnowledgeEdge) -> StorageResult<()> {
        self.edges.write().await.push(edge);
        Ok(())
    }

    async fn excerpts_for(&self, goal: &str, cap: usize) -> StorageResult<Vec<String>> {
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        let goal_lower = goal.to_lowercase();

        // Seed with nodes whose label or content matches the goal, then walk
        // outgoing edges breadth-first. Edges may form cycles: the visited
        // set terminates the walk.
        let mut queue: VecDeque<&str> = nodes
            .values()
            .filter(|n| {
                n.label.to_lowercase().contains(&goal_lower)
                    || n.content.to_lowercase().contains(&goal_lower)
            })
            .map(|n| n.id.as_str())
            .collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut excerpts = Vec::new();

        while let Some(id) = queue.pop_front() {
            if excerpts.len() >= cap {
                break;
            }
            if !visited.insert(id.to_string()) {
                continue;
            }
            if let Some(node) = nodes.get(id) {
                excerpts.push(format!("{}: {}", node.label, node.content));
                for edge in edges.iter().filter(|e| e.from == id) {
                    if !visited.contains(&edge.to) {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }
        Ok(excerpts)
    }
}

/// In-memory task-row mirror.
#[derive(Default)]
pub struct MemoryTaskStore {
    rows: RwLock<HashMap<String, TaskRow>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert(&self, row: TaskRow) -> StorageResult<()> {
        self.rows.write().await.insert(row.task_id.clone(), row);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> StorageResult<Option<TaskRow>> {
        Ok(self.rows.read().await.get(task_id).cloned())
    }

    async fn active(&self) -> StorageResult<Vec<TaskRow>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }
}
