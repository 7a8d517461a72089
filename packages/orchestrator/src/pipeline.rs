//! The end-to-end task pipeline.
//!
//! Order per task: interrupt guard, envelope build, policy check, budget
//! check, idempotency check, then the bounded LLM loop (breaker check,
//! interrupt guard, routed call, provider-health recording, lens
//! handling), and finally the post-task hooks run by the worker.
//!
//! Soft breaker warnings are injected as system-tagged messages on the
//! call they precede. Hard trips, policy blocks, budget blocks and lens
//! verdicts end the task with a failure classified for telemetry.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use steward_approval::ApprovalGate;
use steward_breaker::{BreakerError, CircuitBreaker};
use steward_budget::BudgetEngine;
use steward_policy::PolicyEngine;
use steward_reinforcement::{EscalationThresholdAdapter, RouterPolicyAdapter};
use steward_router::{LlmRouter, RouterError};
use steward_types::{
    CompletionOptions, CostRecord, Event, InterruptRecord, TaggedMessage, TaskEnvelope,
    TaskStatus, TelemetryKind, ToolInvocation,
};

use crate::context::ContextAssembler;
use crate::dag::TaskDag;
use crate::events::EventBus;
use crate::interrupt::InterruptStore;
use crate::queue::Job;

/// Executes capability invocations surfaced by the model. Real adapters
/// live outside the core; the default implementation only acknowledges.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        envelope: &TaskEnvelope,
        invocation: &ToolInvocation,
    ) -> Result<String, String>;
}

/// Acknowledges every invocation without side effects.
pub struct NoopToolExecutor;

#[async_trait]
impl ToolExecutor for NoopToolExecutor {
    async fn execute(
        &self,
        _envelope: &TaskEnvelope,
        invocation: &ToolInvocation,
    ) -> Result<String, String> {
        Ok(format!("{} acknowledged", invocation.tool))
    }
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base confidence threshold below which output escalates to review;
    /// the learned delta shifts it within [0.30, 0.95].
    pub base_escalation_threshold: f64,
    pub completion_options: CompletionOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_escalation_threshold: 0.55,
            completion_options: CompletionOptions::default(),
        }
    }
}

/// Terminal success of one pipeline run.
#[derive(Debug, Clone)]
pub struct TaskSuccess {
    pub result: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub budget_dollars: f64,
    pub confidence: f64,
    pub escalated: bool,
    pub escalation_warranted: Option<bool>,
    pub provider_id: String,
    pub task_class: String,
}

/// Terminal failure of one pipeline run.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub kind: TelemetryKind,
    pub message: String,
    /// Transient provider failures requeue instead of failing the node
    pub retryable: bool,
    pub escalated: bool,
    /// A human reviewer explicitly rejected the escalated output; timeout
    /// auto-resolutions leave this false
    pub reviewer_rejected: bool,
    pub total_cost: f64,
    pub budget_dollars: f64,
    pub confidence: f64,
    pub provider_id: Option<String>,
    pub task_class: Option<String>,
}

/// How a pipeline run ended.
pub enum PipelineEnd {
    Success(TaskSuccess),
    Failure(TaskFailure),
    Interrupted(InterruptRecord),
}

pub struct TaskPipeline {
    pub policy: Arc<PolicyEngine>,
    pub budget: Arc<BudgetEngine>,
    pub breaker: Arc<CircuitBreaker>,
    pub approval: Arc<ApprovalGate>,
    pub router: Arc<LlmRouter>,
    pub router_adapter: Arc<RouterPolicyAdapter>,
    pub threshold_adapter: Arc<EscalationThresholdAdapter>,
    pub interrupts: Arc<InterruptStore>,
    pub events: Arc<EventBus>,
    pub dag: Arc<RwLock<TaskDag>>,
    pub tools: Arc<dyn ToolExecutor>,
    pub config: PipelineConfig,
}

impl TaskPipeline {
    pub async fn run(&self, job: &Job, assembler: &ContextAssembler) -> PipelineEnd {
        let task_id = job.task_id.as_str();

        // 1. Interrupt guard at pipeline start.
        if let Err(record) = self.interrupts.guard(task_id).await {
            return PipelineEnd::Interrupted(record);
        }

        // 2. Envelope build.
        let node = match self.dag.read().await.get(task_id) {
            Some(node) => node.clone(),
            None => {
                return PipelineEnd::Failure(internal_failure(format!(
                    "task '{task_id}' not in DAG"
                )))
            }
        };
        let envelope = match assembler.build(job, &node).await {
            Ok(envelope) => envelope,
            Err(e) => return PipelineEnd::Failure(internal_failure(e.to_string())),
        };
        let task_class = self.router.profile(&envelope).class.as_str().to_string();
        let budget_dollars = envelope.security.max_spend_dollars;
        let mut escalated = false;
        let mut escalation_warranted = None;

        // 3. Policy check.
        let check = match self.policy.check_task(&envelope) {
            Ok(check) => check,
            Err(e) => return PipelineEnd::Failure(internal_failure(e.to_string())),
        };
        if !check.allowed {
            if check.requires_approval {
                let reason = check.reason.clone().unwrap_or_else(|| "approval required".into());
                match self.pause_for_approval(task_id, job, &envelope, &reason).await {
                    // Mandated pre-execution approval is not an escalation;
                    // it does not feed the precision component.
                    Ok(result) if result.approved => {}
                    Ok(result) => {
                        let kind = if result.auto_resolved {
                            TelemetryKind::ApprovalTimeout
                        } else {
                            TelemetryKind::PolicyBlocked
                        };
                        return PipelineEnd::Failure(TaskFailure {
                            kind,
                            message: result
                                .reason
                                .unwrap_or_else(|| "approval rejected".into()),
                            retryable: false,
                            escalated: false,
                            reviewer_rejected: false,
                            total_cost: 0.0,
                            budget_dollars,
                            confidence: 0.5,
                            provider_id: None,
                            task_class: Some(task_class),
                        });
                    }
                    Err(failure) => return PipelineEnd::Failure(failure),
                }
            } else {
                return PipelineEnd::Failure(TaskFailure {
                    kind: TelemetryKind::PolicyBlocked,
                    message: check.reason.unwrap_or_else(|| "blocked by policy".into()),
                    retryable: false,
                    escalated: false,
                    reviewer_rejected: false,
                    total_cost: 0.0,
                    budget_dollars,
                    confidence: 0.5,
                    provider_id: None,
                    task_class: Some(task_class),
                });
            }
        }

        // 4. Budget check. The selected provider's pre-flight estimate
        // supersedes the task's static estimate when one is available.
        let estimate = self
            .router
            .preflight_estimate(&envelope, &self.config.completion_options)
            .map(|e| e.dollars)
            .unwrap_or(envelope.task.estimated_dollars);
        let decision = self.budget.check_budget(
            task_id,
            &job.agent_id,
            envelope.security.max_spend_dollars,
            estimate,
        );
        if !decision.allowed {
            return PipelineEnd::Failure(TaskFailure {
                kind: TelemetryKind::BudgetExceeded,
                message: decision.reason.unwrap_or_else(|| "budget exceeded".into()),
                retryable: false,
                escalated,
                reviewer_rejected: false,
                total_cost: 0.0,
                budget_dollars,
                confidence: 0.5,
                provider_id: None,
                task_class: Some(task_class),
            });
        }

        // 5. Idempotency check.
        let idempotency_key = format!("task:{task_id}");
        let hit = self.policy.check_idempotency_key(&idempotency_key);
        if hit.already_executed {
            let cached = hit
                .previous_result
                .and_then(|v| v.get("result").and_then(|r| r.as_str().map(String::from)))
                .unwrap_or_default();
            self.events
                .publish(task_id, Event::status("Returning previously executed result"))
                .await;
            return PipelineEnd::Success(TaskSuccess {
                result: cached,
                total_cost: 0.0,
                total_tokens: 0,
                budget_dollars,
                confidence: 1.0,
                escalated,
                escalation_warranted,
                provider_id: "cache".into(),
                task_class,
            });
        }

        // The bounded LLM loop. The breaker sees every completion once,
        // right after the call that produced it; its soft warnings are
        // injected as system-tagged messages on the next call.
        let mut conversation = vec![TaggedMessage::task(envelope.task.spec.clone())];
        let mut total_cost = 0.0;
        let mut total_tokens = 0u64;
        let mut provider_used = String::new();

        loop {
            // 7. Interrupt guard before the expensive call.
            if let Err(record) = self.interrupts.guard(task_id).await {
                return PipelineEnd::Interrupted(record);
            }

            // 8. Router call.
            self.events
                .publish(task_id, Event::status("Calling LLM..."))
                .await;
            let profile = self.router.profile(&envelope);
            let forced = self
                .router_adapter
                .select_provider(&profile, &job.company_id, &job.agent_id)
                .await;
            let lensed = match self
                .router
                .route_with(
                    forced.as_deref(),
                    None,
                    &conversation,
                    self.config.completion_options.clone(),
                    &envelope,
                )
                .await
            {
                Ok(lensed) => lensed,
                Err(RouterError::ProviderFailure {
                    provider_id,
                    message,
                }) => {
                    // 9 (failure half). Feed the provider breaker.
                    self.breaker.record_provider_call(&provider_id, 0, false);
                    return PipelineEnd::Failure(TaskFailure {
                        kind: TelemetryKind::TaskFailed,
                        message: format!("provider '{provider_id}' failed: {message}"),
                        retryable: true,
                        escalated,
                        reviewer_rejected: false,
                        total_cost,
                        budget_dollars,
                        confidence: 0.5,
                        provider_id: Some(provider_id),
                        task_class: Some(task_class),
                    });
                }
                Err(e) => {
                    return PipelineEnd::Failure(TaskFailure {
                        kind: TelemetryKind::TaskFailed,
                        message: e.to_string(),
                        retryable: false,
                        escalated,
                        reviewer_rejected: false,
                        total_cost,
                        budget_dollars,
                        confidence: 0.5,
                        provider_id: None,
                        task_class: Some(task_class),
                    });
                }
            };

            // 9. Provider-call recording.
            let completion = &lensed.completion;
            self.breaker
                .record_provider_call(&completion.provider_id, completion.latency_ms, true);
            self.budget.record_cost(CostRecord::llm_call(
                task_id,
                &job.agent_id,
                completion.input_tokens,
                completion.output_tokens,
                completion.dollars,
            ));
            total_cost += completion.dollars;
            total_tokens += completion.total_tokens();
            provider_used = completion.provider_id.clone();

            // 6. Circuit-breaker iteration check on this completion.
            match self.breaker.before_iteration(
                task_id,
                Some(&completion.content),
                completion.had_tool_call(),
            ) {
                Ok(warnings) => {
                    for warning in warnings {
                        self.events
                            .publish(task_id, Event::status(warning.message.clone()))
                            .await;
                        conversation.push(TaggedMessage::system(warning.message));
                    }
                }
                Err(BreakerError::Tripped(event)) => {
                    return PipelineEnd::Failure(TaskFailure {
                        kind: TelemetryKind::CircuitBreakerHardTrip,
                        message: event.message,
                        retryable: false,
                        escalated,
                        reviewer_rejected: false,
                        total_cost,
                        budget_dollars,
                        confidence: 0.5,
                        provider_id: provider_for_outcome(&provider_used),
                        task_class: Some(task_class),
                    });
                }
            }

            // 10. Lens result handling.
            if lensed.constraint_violation {
                return PipelineEnd::Failure(TaskFailure {
                    kind: TelemetryKind::ConstraintViolation,
                    message: format!(
                        "output violates locked constraints: {}",
                        lensed.violated_constraints.join(", ")
                    ),
                    retryable: false,
                    escalated,
                    reviewer_rejected: false,
                    total_cost,
                    budget_dollars,
                    confidence: lensed.confidence,
                    provider_id: Some(provider_used),
                    task_class: Some(task_class),
                });
            }

            let effective_threshold = self
                .threshold_adapter
                .effective_threshold(
                    self.config.base_escalation_threshold,
                    &job.company_id,
                    &job.agent_id,
                    &task_class,
                )
                .await;
            if lensed.escalate || lensed.confidence < effective_threshold {
                escalated = true;
                let reason = if lensed.escalate {
                    format!("escalation trigger matched: {}", lensed.matched_triggers.join(", "))
                } else {
                    format!(
                        "confidence {:.2} below threshold {:.2}",
                        lensed.confidence, effective_threshold
                    )
                };
                match self.pause_for_approval(task_id, job, &envelope, &reason).await {
                    Ok(result) if result.approved => {
                        // Reviewer accepted the output; an approved
                        // escalation counts as a wasted one for the
                        // precision component.
                        escalation_warranted = Some(false);
                        if result.auto_resolved {
                            escalation_warranted = None;
                        }
                    }
                    Ok(result) => {
                        let kind = if result.auto_resolved {
                            TelemetryKind::ApprovalTimeout
                        } else {
                            TelemetryKind::TaskFailed
                        };
                        return PipelineEnd::Failure(TaskFailure {
                            kind,
                            message: result
                                .reason
                                .unwrap_or_else(|| "output rejected by reviewer".into()),
                            retryable: false,
                            escalated: true,
                            reviewer_rejected: !result.auto_resolved,
                            total_cost,
                            budget_dollars,
                            confidence: lensed.confidence,
                            provider_id: Some(provider_used),
                            task_class: Some(task_class),
                        });
                    }
                    Err(failure) => return PipelineEnd::Failure(failure),
                }
            }

            // Capability invocations keep the loop going; a plain reply
            // ends it.
            if completion.had_tool_call() {
                for invocation in &completion.tool_calls {
                    self.events
                        .publish(
                            task_id,
                            Event::ToolCall {
                                tool: invocation.tool.clone(),
                                description: invocation.description.clone(),
                            },
                        )
                        .await;
                    if !self.policy.is_adapter_allowed(&invocation.tool, &envelope) {
                        return PipelineEnd::Failure(TaskFailure {
                            kind: TelemetryKind::PolicyBlocked,
                            message: format!(
                                "adapter '{}' is not allowed for this task",
                                invocation.tool
                            ),
                            retryable: false,
                            escalated,
                            reviewer_rejected: false,
                            total_cost,
                            budget_dollars,
                            confidence: lensed.confidence,
                            provider_id: Some(provider_used),
                            task_class: Some(task_class),
                        });
                    }
                    let tool_result = self
                        .tools
                        .execute(&envelope, invocation)
                        .await
                        .unwrap_or_else(|e| format!("tool failed: {e}"));
                    conversation.push(TaggedMessage::assistant(completion.content.clone()));
                    conversation.push(TaggedMessage::task(format!(
                        "[tool:{}] {}",
                        invocation.tool, tool_result
                    )));
                }
                continue;
            }

            // Final output.
            self.events
                .publish(
                    task_id,
                    Event::Stream {
                        chunk: completion.content.clone(),
                    },
                )
                .await;
            self.policy.record_idempotency_key(
                idempotency_key,
                json!({ "result": completion.content }),
            );
            return PipelineEnd::Success(TaskSuccess {
                result: completion.content.clone(),
                total_cost,
                total_tokens,
                budget_dollars,
                confidence: lensed.confidence,
                escalated,
                escalation_warranted,
                provider_id: provider_used,
                task_class,
            });
        }
    }

    /// Publish the approval event, flip the node to halted, block on the
    /// gate, and restore `in_progress` when approved.
    async fn pause_for_approval(
        &self,
        task_id: &str,
        job: &Job,
        envelope: &TaskEnvelope,
        reason: &str,
    ) -> Result<steward_types::ApprovalResult, TaskFailure> {
        self.events
            .publish(
                task_id,
                Event::ApprovalNeeded {
                    task_id: task_id.to_string(),
                    action: envelope.task.spec.chars().take(120).collect(),
                    context: reason.to_string(),
                },
            )
            .await;
        if let Err(e) = self
            .dag
            .write()
            .await
            .set_status(task_id, TaskStatus::HaltedForApproval)
        {
            tracing::warn!(task_id, error = %e, "could not mark task halted for approval");
        }

        let result = self
            .approval
            .request_approval(task_id, &job.agent_id, reason)
            .await
            .map_err(|e| internal_failure(e.to_string()))?;

        if result.approved {
            if let Err(e) = self
                .dag
                .write()
                .await
                .set_status(task_id, TaskStatus::InProgress)
            {
                tracing::warn!(task_id, error = %e, "could not resume task after approval");
            }
        }
        Ok(result)
    }
}

fn internal_failure(message: String) -> TaskFailure {
    TaskFailure {
        kind: TelemetryKind::TaskFailed,
        message,
        retryable: false,
        escalated: false,
        reviewer_rejected: false,
        total_cost: 0.0,
        budget_dollars: 0.0,
        confidence: 0.5,
        provider_id: None,
        task_class: None,
    }
}

fn provider_for_outcome(provider_used: &str) -> Option<String> {
    if provider_used.is_empty() {
        None
    } else {
        Some(provider_used.to_string())
    }
}
