//! The Interrupt Store: shared, fast halt-and-resume signal.
//!
//! Records live in the shared KV store as JSON with a TTL (default 1 h).
//! A record that fails to parse self-heals on read: it is deleted and
//! reported as not-halted. The pipeline drains halts at two guard points
//! per iteration (pipeline start and pre-LLM).

use std::sync::Arc;
use std::time::Duration;

use steward_storage::KvStore;
use steward_types::{InterruptReason, InterruptRecord};

const KEY_PREFIX: &str = "interrupt:";

/// State returned by [`InterruptStore::state`].
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptState {
    pub is_halted: bool,
    pub record: Option<InterruptRecord>,
}

pub struct InterruptStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl InterruptStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(task_id: &str) -> String {
        format!("{KEY_PREFIX}{task_id}")
    }

    /// Write a halt signal for a task.
    pub async fn halt(
        &self,
        task_id: &str,
        reason: InterruptReason,
        message: Option<String>,
    ) -> Result<(), steward_storage::StorageError> {
        let record = InterruptRecord::new(reason, message);
        let json = serde_json::to_string(&record)?;
        tracing::info!(task_id, ?reason, "task halted");
        self.kv.set(&Self::key(task_id), json, Some(self.ttl)).await
    }

    /// Clear a halt signal.
    pub async fn resume(&self, task_id: &str) -> Result<(), steward_storage::StorageError> {
        tracing::info!(task_id, "task resumed");
        self.kv.delete(&Self::key(task_id)).await
    }

    pub async fn is_halted(&self, task_id: &str) -> bool {
        self.state(task_id).await.is_halted
    }

    /// Full halt state. Corrupted records are deleted and treated as
    /// not halted.
    pub async fn state(&self, task_id: &str) -> InterruptState {
        let key = Self::key(task_id);
        let raw = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            _ => {
                return InterruptState {
                    is_halted: false,
                    record: None,
                }
            }
        };
        match serde_json::from_str::<InterruptRecord>(&raw) {
            Ok(record) => InterruptState {
                is_halted: true,
                record: Some(record),
            },
            Err(e) => {
                tracing::warn!(task_id, error = %e, "corrupted interrupt record; self-healing");
                let _ = self.kv.delete(&key).await;
                InterruptState {
                    is_halted: false,
                    record: None,
                }
            }
        }
    }

    /// Guard point: `Err` with the halt record if the task is halted.
    pub async fn guard(&self, task_id: &str) -> Result<(), InterruptRecord> {
        match self.state(task_id).await {
            InterruptState {
                is_halted: true,
                record: Some(record),
            } => Err(record),
            _ => Ok(()),
        }
    }

    /// Task ids with a live halt signal.
    pub async fn list_halted(&self) -> Vec<String> {
        match self.kv.keys(KEY_PREFIX).await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
