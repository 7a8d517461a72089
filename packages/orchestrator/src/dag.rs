//! The task DAG: nodes, readiness, cascade failure.
//!
//! Acyclic by construction: the builder rejects cycles and unknown
//! dependencies at build time. Status transitions are monotone except
//! `halted_for_approval → in_progress` and `interrupted → in_progress`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

use steward_types::{TaskDefinition, TaskStatus};

#[derive(Debug, Error)]
pub enum DagError {
    #[error("dependency cycle involving submission index {0}")]
    Cycle(usize),
    #[error("submission index {index} depends on unknown index {dependency}")]
    UnknownDependency { index: usize, dependency: usize },
    #[error("unknown task '{0}'")]
    UnknownTask(String),
    #[error("illegal status transition for '{task_id}': {from:?} -> {to:?}")]
    IllegalTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// One task to submit: the definition plus dependencies as indices into
/// the same batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub definition: TaskDefinition,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Declared risk requiring human approval before execution
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_reason: Option<String>,
}

impl TaskSubmission {
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            depends_on: Vec::new(),
            requires_approval: false,
            approval_reason: None,
        }
    }

    pub fn depending_on(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = indices;
        self
    }

    pub fn with_approval(mut self, reason: impl Into<String>) -> Self {
        self.requires_approval = true;
        self.approval_reason = Some(reason.into());
        self
    }
}

/// A DAG node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub task_id: String,
    pub definition: TaskDefinition,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// The task graph. One per orchestrator; batches merge into it.
#[derive(Debug, Default)]
pub struct TaskDag {
    nodes: HashMap<String, DagNode>,
}

impl TaskDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of submissions, assigning fresh task ids. Dependencies
    /// are indices into the batch; cycles and unknown indices are rejected
    /// before anything is inserted. Returns the assigned ids in batch
    /// order.
    pub fn add_batch(&mut self, submissions: Vec<TaskSubmission>) -> Result<Vec<String>, DagError> {
        // Validate dependency indices.
        for (index, submission) in submissions.iter().enumerate() {
            for &dependency in &submission.depends_on {
                if dependency >= submissions.len() {
                    return Err(DagError::UnknownDependency { index, dependency });
                }
            }
        }
        // Reject cycles with a three-color depth-first walk.
        let mut color = vec![0u8; submissions.len()]; // 0 white, 1 grey, 2 black
        fn visit(
            node: usize,
            submissions: &[TaskSubmission],
            color: &mut [u8],
        ) -> Result<(), DagError> {
            match color[node] {
                1 => return Err(DagError::Cycle(node)),
                2 => return Ok(()),
                _ => {}
            }
            color[node] = 1;
            for &dep in &submissions[node].depends_on {
                visit(dep, submissions, color)?;
            }
            color[node] = 2;
            Ok(())
        }
        for index in 0..submissions.len() {
            visit(index, &submissions, &mut color)?;
        }

        let ids: Vec<String> = submissions
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        for (index, submission) in submissions.into_iter().enumerate() {
            let depends_on = submission
                .depends_on
                .iter()
                .map(|&d| ids[d].clone())
                .collect();
            self.nodes.insert(
                ids[index].clone(),
                DagNode {
                    task_id: ids[index].clone(),
                    definition: submission.definition,
                    depends_on,
                    status: TaskStatus::Pending,
                    requires_approval: submission.requires_approval,
                    approval_reason: submission.approval_reason,
                    result: None,
                    error: None,
                },
            );
        }
        Ok(ids)
    }

    pub fn get(&self, task_id: &str) -> Option<&DagNode> {
        self.nodes.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pending nodes whose dependencies are all completed.
    pub fn ready_tasks(&self) -> Vec<&DagNode> {
        self.nodes
            .values()
            .filter(|n| n.status == TaskStatus::Pending)
            .filter(|n| {
                n.depends_on.iter().all(|dep| {
                    self.nodes
                        .get(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .collect()
    }

    /// Transition a node, enforcing legality.
    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) -> Result<(), DagError> {
        let node = self
            .nodes
            .get_mut(task_id)
            .ok_or_else(|| DagError::UnknownTask(task_id.to_string()))?;
        if !node.status.can_transition_to(status) {
            return Err(DagError::IllegalTransition {
                task_id: task_id.to_string(),
                from: node.status,
                to: status,
            });
        }
        node.status = status;
        Ok(())
    }

    pub fn complete(&mut self, task_id: &str, result: String) -> Result<(), DagError> {
        self.set_status(task_id, TaskStatus::Completed)?;
        if let Some(node) = self.nodes.get_mut(task_id) {
            node.result = Some(result);
        }
        Ok(())
    }

    /// Fail a node and cascade: any pending node all of whose dependencies
    /// are failed also fails, iteratively. Returns the ids failed by the
    /// cascade (not the root).
    pub fn fail(&mut self, task_id: &str, error: String) -> Result<Vec<String>, DagError> {
        self.set_status(task_id, TaskStatus::Failed)?;
        if let Some(node) = self.nodes.get_mut(task_id) {
            node.error = Some(error);
        }
        Ok(self.cascade_failures())
    }

    fn cascade_failures(&mut self) -> Vec<String> {
        let mut newly_failed = Vec::new();
        loop {
            let candidates: Vec<String> = self
                .nodes
                .values()
                .filter(|n| n.status == TaskStatus::Pending && !n.depends_on.is_empty())
                .filter(|n| {
                    n.depends_on.iter().all(|dep| {
                        self.nodes
                            .get(dep)
                            .is_some_and(|d| d.status == TaskStatus::Failed)
                    })
                })
                .map(|n| n.task_id.clone())
                .collect();
            if candidates.is_empty() {
                break;
            }
            for task_id in candidates {
                if let Some(node) = self.nodes.get_mut(&task_id) {
                    let failed_deps = node.depends_on.join(", ");
                    node.status = TaskStatus::Failed;
                    node.error = Some(format!("Upstream dependency failed: {failed_deps}"));
                    newly_failed.push(task_id);
                }
            }
        }
        newly_failed
    }

    /// Ids of nodes in non-terminal states.
    pub fn active_ids(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| !n.status.is_terminal())
            .map(|n| n.task_id.clone())
            .collect()
    }

    /// Every node id with its status.
    pub fn statuses(&self) -> HashMap<String, TaskStatus> {
        self.nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.status))
            .collect()
    }

    /// Distinct statuses present (test helper).
    pub fn status_set(&self) -> HashSet<TaskStatus> {
        self.nodes.values().map(|n| n.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(spec: &str) -> TaskSubmission {
        TaskSubmission::new(TaskDefinition::new(spec))
    }

    #[test]
    fn roots_are_ready_dependents_wait() {
        let mut dag = TaskDag::new();
        let ids = dag
            .add_batch(vec![
                submission("a"),
                submission("b").depending_on(vec![0]),
            ])
            .unwrap();

        let ready: Vec<&str> = dag.ready_tasks().iter().map(|n| n.task_id.as_str()).collect();
        assert_eq!(ready, vec![ids[0].as_str()]);

        dag.set_status(&ids[0], TaskStatus::InProgress).unwrap();
        dag.complete(&ids[0], "done".into()).unwrap();
        let ready: Vec<&str> = dag.ready_tasks().iter().map(|n| n.task_id.as_str()).collect();
        assert_eq!(ready, vec![ids[1].as_str()]);
    }

    #[test]
    fn cycles_are_rejected_at_build_time() {
        let mut dag = TaskDag::new();
        let result = dag.add_batch(vec![
            submission("a").depending_on(vec![1]),
            submission("b").depending_on(vec![0]),
        ]);
        assert!(matches!(result, Err(DagError::Cycle(_))));
        assert!(dag.is_empty());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut dag = TaskDag::new();
        let result = dag.add_batch(vec![submission("a").depending_on(vec![7])]);
        assert!(matches!(
            result,
            Err(DagError::UnknownDependency { dependency: 7, .. })
        ));
    }

    #[test]
    fn cascade_fails_only_fully_failed_dependencies() {
        let mut dag = TaskDag::new();
        // A; B depends on A; D; C depends on A and D.
        let ids = dag
            .add_batch(vec![
                submission("a"),
                submission("b").depending_on(vec![0]),
                submission("d"),
                submission("c").depending_on(vec![0, 2]),
            ])
            .unwrap();
        let (a, b, d, c) = (&ids[0], &ids[1], &ids[2], &ids[3]);

        dag.set_status(d, TaskStatus::InProgress).unwrap();
        dag.complete(d, "done".into()).unwrap();

        dag.set_status(a, TaskStatus::InProgress).unwrap();
        let cascaded = dag.fail(a, "provider exploded".into()).unwrap();

        // B's only dependency failed: cascades.
        assert_eq!(cascaded, vec![b.clone()]);
        assert_eq!(dag.get(b).unwrap().status, TaskStatus::Failed);
        assert!(dag
            .get(b)
            .unwrap()
            .error
            .as_ref()
            .unwrap()
            .starts_with("Upstream dependency failed:"));
        // C still has a live dependency (D completed): remains pending.
        assert_eq!(dag.get(c).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn cascade_is_transitive() {
        let mut dag = TaskDag::new();
        let ids = dag
            .add_batch(vec![
                submission("a"),
                submission("b").depending_on(vec![0]),
                submission("c").depending_on(vec![1]),
            ])
            .unwrap();
        dag.set_status(&ids[0], TaskStatus::InProgress).unwrap();
        let cascaded = dag.fail(&ids[0], "boom".into()).unwrap();
        assert_eq!(cascaded.len(), 2);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut dag = TaskDag::new();
        let ids = dag.add_batch(vec![submission("a")]).unwrap();
        assert!(matches!(
            dag.set_status(&ids[0], TaskStatus::Completed),
            Err(DagError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn approval_resume_transition_is_legal() {
        let mut dag = TaskDag::new();
        let ids = dag.add_batch(vec![submission("a")]).unwrap();
        dag.set_status(&ids[0], TaskStatus::InProgress).unwrap();
        dag.set_status(&ids[0], TaskStatus::HaltedForApproval)
            .unwrap();
        dag.set_status(&ids[0], TaskStatus::InProgress).unwrap();
    }
}
