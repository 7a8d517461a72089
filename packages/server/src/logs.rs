//! In-memory log ring plus broadcast, fed by a tracing layer.
//!
//! Backs `GET /api/logs` (tail with filters) and the SSE stream at
//! `GET /api/logs/stream`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const DEFAULT_CAPACITY: usize = 2048;
const BROADCAST_CAPACITY: usize = 256;

/// One captured log line, as served over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub ts: DateTime<Utc>,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Bounded ring of recent log lines plus a live broadcast.
pub struct LogBuffer {
    ring: Mutex<VecDeque<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
            capacity,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut ring = self.ring.lock();
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    /// Tail of the ring with optional level/task filters.
    pub fn tail(
        &self,
        lines: usize,
        level: Option<&str>,
        task_id: Option<&str>,
    ) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        ring.iter()
            .rev()
            .filter(|e| level.is_none_or(|l| e.level.eq_ignore_ascii_case(l)))
            .filter(|e| task_id.is_none_or(|t| e.task_id.as_deref() == Some(t)))
            .take(lines)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

/// Tracing layer that tees formatted events into a [`LogBuffer`].
pub struct LogCaptureLayer {
    buffer: Arc<LogBuffer>,
}

impl LogCaptureLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    task_id: Option<String>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "task_id" => self.task_id = Some(format!("{value:?}").trim_matches('"').to_string()),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "task_id" => self.task_id = Some(value.to_string()),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        self.buffer.push(LogEntry {
            level: event.metadata().level().to_string(),
            ts: Utc::now(),
            msg: collector.message,
            task_id: collector.task_id,
        });
    }
}
