//! Runtime counters for the status surface.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use steward_storage::{StorageResult, TelemetryStore};
use steward_types::{TelemetryEvent, TelemetryKind};

/// Atomic counters aggregated by watching the telemetry stream.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_interrupted: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_submission(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Telemetry decorator that counts outcomes on their way to the store.
pub struct CountingTelemetry {
    inner: Arc<dyn TelemetryStore>,
    metrics: Arc<RuntimeMetrics>,
}

impl CountingTelemetry {
    pub fn new(inner: Arc<dyn TelemetryStore>, metrics: Arc<RuntimeMetrics>) -> Arc<Self> {
        Arc::new(Self { inner, metrics })
    }
}

#[async_trait]
impl TelemetryStore for CountingTelemetry {
    async fn append(&self, event: TelemetryEvent) -> StorageResult<()> {
        match event.event_type {
            TelemetryKind::TaskCompleted => {
                self.metrics.tasks_completed.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryKind::TaskInterrupted => {
                self.metrics
                    .tasks_interrupted
                    .fetch_add(1, Ordering::Relaxed);
            }
            TelemetryKind::TaskFailed
            | TelemetryKind::ConstraintViolation
            | TelemetryKind::CircuitBreakerHardTrip
            | TelemetryKind::BudgetExceeded
            | TelemetryKind::PolicyBlocked
            | TelemetryKind::ApprovalTimeout => {
                self.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.inner.append(event).await
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<TelemetryEvent>> {
        self.inner.recent(limit).await
    }
}

/// Telemetry decorator that buffers rows the backend rejected and retries
/// them in the background. Rows that keep failing are dropped once the
/// buffer is full; telemetry must never wedge the pipeline.
pub struct BufferedTelemetry {
    inner: Arc<dyn TelemetryStore>,
    pending: parking_lot::Mutex<std::collections::VecDeque<TelemetryEvent>>,
    capacity: usize,
}

impl BufferedTelemetry {
    const DEFAULT_CAPACITY: usize = 512;

    pub fn new(inner: Arc<dyn TelemetryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            pending: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            capacity: Self::DEFAULT_CAPACITY,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Retry everything in the buffer once. Rows that fail again go back
    /// to the front in their original order.
    pub async fn flush(&self) {
        loop {
            let Some(event) = self.pending.lock().pop_front() else {
                return;
            };
            if let Err(e) = self.inner.append(event.clone()).await {
                tracing::warn!(error = %e, "telemetry retry failed; keeping row buffered");
                self.pending.lock().push_front(event);
                return;
            }
        }
    }

    /// Background flusher at a fixed interval.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let buffer = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                buffer.flush().await;
            }
        })
    }
}

#[async_trait]
impl TelemetryStore for BufferedTelemetry {
    async fn append(&self, event: TelemetryEvent) -> StorageResult<()> {
        if let Err(e) = self.inner.append(event.clone()).await {
            let mut pending = self.pending.lock();
            if pending.len() >= self.capacity {
                tracing::error!("telemetry buffer full; dropping oldest row");
                pending.pop_front();
            }
            tracing::warn!(error = %e, "telemetry append failed; buffered for retry");
            pending.push_back(event);
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<TelemetryEvent>> {
        self.inner.recent(limit).await
    }
}
