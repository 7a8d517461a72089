//! The Approval Gate.
//!
//! Pauses a task for human review: inserts a pending row in the durable
//! approval queue, polls until a reviewer resolves it or the timeout
//! elapses, and forwards any reviewer correction to the training service
//! as a learning signal.
//!
//! State machine: `pending → approved | rejected`, with timeouts
//! auto-resolved by the configured [`TimeoutAction`]. Every resolution
//! carries a non-empty `resolved_by`.

pub mod training;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use steward_storage::{ApprovalQueueStore, StorageError};
use steward_types::{ApprovalResult, ApprovalRow, ApprovalStatus};

pub use training::{CorrectionPayload, HttpTrainingClient, TrainingSink};

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What a timeout resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Reject on timeout
    #[default]
    Reject,
    /// Approve low-risk requests on timeout
    AutoApproveLowRisk,
}

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub timeout_action: TimeoutAction,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(4 * 3600),
            timeout_action: TimeoutAction::Reject,
        }
    }
}

impl ApprovalConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout_action(mut self, action: TimeoutAction) -> Self {
        self.timeout_action = action;
        self
    }
}

/// The Approval Gate.
pub struct ApprovalGate {
    config: ApprovalConfig,
    queue: Arc<dyn ApprovalQueueStore>,
    training: Option<Arc<dyn TrainingSink>>,
}

impl ApprovalGate {
    pub fn new(
        config: ApprovalConfig,
        queue: Arc<dyn ApprovalQueueStore>,
        training: Option<Arc<dyn TrainingSink>>,
    ) -> Self {
        Self {
            config,
            queue,
            training,
        }
    }

    /// Insert a pending row and poll until resolved or timed out.
    ///
    /// The caller marks the task `halted_for_approval` before invoking and
    /// resumes or aborts on the returned result.
    pub async fn request_approval(
        &self,
        task_id: &str,
        agent_id: &str,
        reason: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        let row = ApprovalRow::pending(task_id, agent_id, reason);
        let row_id = row.id;
        self.queue.insert(row).await?;
        tracing::info!(task_id, %row_id, reason, "approval requested");

        let deadline = tokio::time::Instant::now() + self.config.timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let row = self
                .queue
                .get(row_id)
                .await?
                .ok_or_else(|| StorageError::NotFound(row_id.to_string()))?;
            match row.status {
                ApprovalStatus::Approved | ApprovalStatus::Rejected => {
                    return Ok(self.resolved(row).await);
                }
                ApprovalStatus::Pending => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(self.timed_out(row_id, task_id).await?);
            }
        }
    }

    /// Build the result for a reviewer-resolved row and forward any
    /// correction to the training service.
    async fn resolved(&self, row: ApprovalRow) -> ApprovalResult {
        if let Some(correction) = row.correction.clone() {
            self.forward_correction(&row, correction).await;
        }
        ApprovalResult {
            approved: row.status == ApprovalStatus::Approved,
            resolved_by: row
                .resolved_by
                .clone()
                .unwrap_or_else(|| "reviewer".to_string()),
            resolved_at: row.resolved_at.unwrap_or_else(chrono::Utc::now),
            reason: Some(row.reason.clone()),
            correction_content: row.correction,
            auto_resolved: false,
        }
    }

    /// Resolve a timed-out row per the configured action.
    async fn timed_out(
        &self,
        row_id: uuid::Uuid,
        task_id: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        let hours = self.config.timeout.as_secs_f64() / 3600.0;
        let (status, resolved_by, reason, approved) = match self.config.timeout_action {
            TimeoutAction::AutoApproveLowRisk => (
                ApprovalStatus::Approved,
                "system:timeout_auto_approve",
                format!("Auto-approved after {hours:.1}h timeout"),
                true,
            ),
            TimeoutAction::Reject => (
                ApprovalStatus::Rejected,
                "system:timeout",
                format!("Rejected after {hours:.1}h timeout"),
                false,
            ),
        };
        self.queue
            .resolve(row_id, status, resolved_by, Some(reason.clone()), None)
            .await?;
        tracing::warn!(task_id, %row_id, resolved_by, "approval timed out");
        Ok(ApprovalResult {
            approved,
            resolved_by: resolved_by.to_string(),
            resolved_at: chrono::Utc::now(),
            reason: Some(reason),
            correction_content: None,
            auto_resolved: true,
        })
    }

    async fn forward_correction(&self, row: &ApprovalRow, correction: String) {
        let Some(training) = &self.training else {
            return;
        };
        let payload = CorrectionPayload {
            agent_id: row.agent_id.clone(),
            task_id: row.task_id.clone(),
            correction_content: correction,
            correction_type: "approval_correction".to_string(),
            created_at: chrono::Utc::now(),
        };
        // Training-service failures are logged, never propagated.
        match training.submit_correction(payload).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_correction_incorporated(row.id).await {
                    tracing::warn!(row_id = %row.id, error = %e, "failed to mark correction incorporated");
                }
            }
            Err(e) => {
                tracing::warn!(row_id = %row.id, error = %e, "correction forwarding failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use support::*;
    use steward_storage::mem::MemoryApprovalQueue;

    mod support {
        use super::super::training::{CorrectionPayload, TrainingSink};
        use async_trait::async_trait;
        use std::sync::Mutex;

        /// Capturing training sink for tests.
        #[derive(Default)]
        pub struct RecordingSink {
            pub received: Mutex<Vec<CorrectionPayload>>,
        }

        #[async_trait]
        impl TrainingSink for RecordingSink {
            async fn submit_correction(
                &self,
                payload: CorrectionPayload,
            ) -> Result<(), reqwest::Error> {
                self.received.lock().unwrap().push(payload);
                Ok(())
            }
        }
    }

    fn fast_config(action: TimeoutAction) -> ApprovalConfig {
        ApprovalConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_millis(200))
            .with_timeout_action(action)
    }

    #[tokio::test]
    async fn reviewer_approval_resolves() {
        let queue = Arc::new(MemoryApprovalQueue::new());
        let gate = ApprovalGate::new(fast_config(TimeoutAction::Reject), queue.clone(), None);

        let queue_bg = queue.clone();
        let approver = tokio::spawn(async move {
            // Wait for the pending row, then approve it.
            loop {
                if let Some(row) = queue_bg.pending_for_task("t1").await.unwrap() {
                    queue_bg
                        .resolve(row.id, ApprovalStatus::Approved, "founder", None, None)
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = gate.request_approval("t1", "a1", "risky send").await.unwrap();
        approver.await.unwrap();
        assert!(result.approved);
        assert_eq!(result.resolved_by, "founder");
        assert!(!result.auto_resolved);
    }

    #[tokio::test]
    async fn timeout_auto_approve_low_risk() {
        let queue = Arc::new(MemoryApprovalQueue::new());
        let gate = ApprovalGate::new(
            fast_config(TimeoutAction::AutoApproveLowRisk),
            queue.clone(),
            None,
        );

        let started = tokio::time::Instant::now();
        let result = gate.request_approval("t1", "a1", "low risk").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(result.approved);
        assert!(result.auto_resolved);
        assert_eq!(result.resolved_by, "system:timeout_auto_approve");
        assert_eq!(
            result.reason.as_deref(),
            Some("Auto-approved after 0.0h timeout")
        );

        // The durable row records the auto-resolution.
        let pending = queue.pending_for_task("t1").await.unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn timeout_default_rejects() {
        let queue = Arc::new(MemoryApprovalQueue::new());
        let gate = ApprovalGate::new(fast_config(TimeoutAction::Reject), queue, None);

        let result = gate.request_approval("t1", "a1", "anything").await.unwrap();
        assert!(!result.approved);
        assert!(result.auto_resolved);
        assert_eq!(result.resolved_by, "system:timeout");
    }

    #[tokio::test]
    async fn correction_is_forwarded_and_marked() {
        let queue = Arc::new(MemoryApprovalQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let gate = ApprovalGate::new(
            fast_config(TimeoutAction::Reject),
            queue.clone(),
            Some(sink.clone()),
        );

        let queue_bg = queue.clone();
        tokio::spawn(async move {
            loop {
                if let Some(row) = queue_bg.pending_for_task("t1").await.unwrap() {
                    queue_bg
                        .resolve(
                            row.id,
                            ApprovalStatus::Rejected,
                            "founder",
                            None,
                            Some("tone it down, no discounts".into()),
                        )
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = gate.request_approval("t1", "a1", "draft email").await.unwrap();
        assert!(!result.approved);
        assert_eq!(
            result.correction_content.as_deref(),
            Some("tone it down, no discounts")
        );

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].correction_type, "approval_correction");

        drop(received);
        let rows = queue.list_pending().await.unwrap();
        assert!(rows.is_empty());
    }
}
