//! Task lifecycle status.

use serde::{Deserialize, Serialize};

/// Status of a DAG node.
///
/// Transitions are monotone except `halted_for_approval → in_progress` on
/// approval and `interrupted → in_progress` on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    HaltedForApproval,
    Interrupted,
}

impl TaskStatus {
    /// Terminal states emit no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition out of `self` into `next` is legal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, InProgress) | (Pending, Failed) => true,
            (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, HaltedForApproval)
            | (InProgress, Interrupted) => true,
            (HaltedForApproval, InProgress) | (HaltedForApproval, Failed) => true,
            (Interrupted, InProgress) | (Interrupted, Failed) => true,
            _ => false,
        }
    }
}
