//! Envelope assembly: org context, locked judgment, security bounds.
//!
//! Security fields are populated here and only here, from the Policy
//! Engine (judgment, approval flag) and the Budget Engine's learned
//! multiplier; once the envelope reaches a worker it is never mutated.

use std::collections::HashSet;
use std::sync::Arc;

use steward_policy::PolicyEngine;
use steward_router::classify;
use steward_storage::{ActiveContextStore, AdaptiveStore, DecisionLogStore, KnowledgeGraphStore};
use steward_types::{
    OptimizationMode, OrgContext, SecurityContext, TaskEnvelope,
};

use crate::dag::DagNode;
use crate::queue::Job;
use crate::OrchestratorError;

/// Static profile of the company the agent works for.
#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub goal: String,
    pub key_people: Vec<String>,
    pub constraint_notes: Vec<String>,
    pub remaining_budget_dollars: f64,
    pub optimization_mode: OptimizationMode,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self {
            goal: String::new(),
            key_people: Vec::new(),
            constraint_notes: Vec::new(),
            remaining_budget_dollars: 0.0,
            optimization_mode: OptimizationMode::Balanced,
        }
    }
}

/// Caps applied while gathering org context.
const MAX_ACTIVE_DECISIONS: usize = 15;

pub struct ContextAssembler {
    pub profile: CompanyProfile,
    pub policy: Arc<PolicyEngine>,
    pub decisions: Arc<dyn DecisionLogStore>,
    pub active_context: Arc<dyn ActiveContextStore>,
    pub knowledge: Arc<dyn KnowledgeGraphStore>,
    pub adaptive: Arc<dyn AdaptiveStore>,
    /// Adapters any task may use unless its submission narrows them
    pub default_allowed_adapters: HashSet<String>,
    /// Base per-task spend cap before the learned multiplier
    pub base_task_cap_dollars: f64,
}

impl ContextAssembler {
    /// Build the immutable envelope for one job.
    pub async fn build(&self, job: &Job, node: &DagNode) -> Result<TaskEnvelope, OrchestratorError> {
        let judgment = self.policy.expert_judgment()?;
        let task_class = classify(&node.definition.spec, judgment.hard_constraints.len());

        let active_decisions: Vec<String> = self
            .decisions
            .recent(MAX_ACTIVE_DECISIONS)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.summary)
            .collect();

        let knowledge_excerpts = match self
            .knowledge
            .excerpts_for(&self.profile.goal, OrgContext::MAX_KNOWLEDGE_EXCERPTS)
            .await
        {
            Ok(excerpts) => excerpts,
            Err(e) => {
                tracing::warn!(error = %e, "knowledge graph unavailable; continuing without excerpts");
                Vec::new()
            }
        };

        let snapshot = self
            .active_context
            .load(&job.company_id)
            .await
            .unwrap_or_default()
            .capped();
        // Track this task as in flight on the persistent context.
        if let Err(e) = self
            .active_context
            .add_in_flight(&job.company_id, &job.task_id)
            .await
        {
            tracing::warn!(error = %e, "failed to add task to in-flight list");
        }

        // The learned budget multiplier scales the base cap; absent or
        // frozen params leave it at its stored value.
        let multiplier = self
            .adaptive
            .load_active(&job.company_id, &job.agent_id, task_class.class.as_str())
            .await
            .ok()
            .flatten()
            .map(|p| p.budget_multiplier)
            .unwrap_or(1.0);

        Ok(TaskEnvelope {
            task_id: job.task_id.clone(),
            agent_id: job.agent_id.clone(),
            company_id: job.company_id.clone(),
            seat_id: None,
            expert_id: None,
            judgment,
            org: OrgContext {
                goal: self.profile.goal.clone(),
                active_decisions,
                key_people: self.profile.key_people.clone(),
                remaining_budget_dollars: self.profile.remaining_budget_dollars,
                constraints: self.profile.constraint_notes.clone(),
                knowledge_excerpts,
                active_context: snapshot,
                mode: self.profile.optimization_mode,
            },
            task: node.definition.clone(),
            security: SecurityContext {
                allowed_adapters: self.default_allowed_adapters.clone(),
                max_spend_dollars: self.base_task_cap_dollars * multiplier,
                requires_approval: node.requires_approval,
                approval_reason: node.approval_reason.clone(),
            },
            mode: self.profile.optimization_mode,
        })
    }
}
