//! Approval queue rows and resolution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an approval row. `pending → approved | rejected`; timeouts are
/// auto-resolved to one of the terminal states by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A durable approval-queue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRow {
    pub id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub reason: String,
    pub status: ApprovalStatus,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Reviewer-attached correction text, forwarded to the training service
    pub correction: Option<String>,
    pub correction_incorporated: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRow {
    pub fn pending(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            reason: reason.into(),
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            correction: None,
            correction_incorporated: false,
            created_at: Utc::now(),
        }
    }
}

/// What the gate hands back once a request resolves. `resolved_by` is never
/// empty: a human reviewer id, `system:timeout`, or
/// `system:timeout_auto_approve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub approved: bool,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub correction_content: Option<String>,
    pub auto_resolved: bool,
}
