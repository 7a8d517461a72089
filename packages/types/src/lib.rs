//! Steward shared data model.
//!
//! Every pillar of the runtime speaks these types: the task envelope and its
//! security context, source-tagged messages, the boot-locked policy records,
//! the per-task event union streamed to callers, cost records and the model
//! price table, and the adaptive parameter set consumed by the router and
//! escalation adapters.
//!
//! This package carries no behavior beyond constructors, caps, and small
//! helpers; the engines that enforce the semantics live in their own
//! packages.

pub mod adaptive;
pub mod approval;
pub mod completion;
pub mod cost;
pub mod envelope;
pub mod event;
pub mod interrupt;
pub mod memory;
pub mod message;
pub mod policy;
pub mod task;

pub use adaptive::{
    AdaptiveAuditRow, AdaptiveParams, ParamRange, RewardBreakdown, BUDGET_MULTIPLIER_RANGE,
    DELEGATION_DEPTH_RANGE, ESCALATION_DELTA_RANGE, PROVIDER_WEIGHT_RANGE, RETRY_WEIGHTING_RANGE,
};
pub use approval::{ApprovalResult, ApprovalRow, ApprovalStatus};
pub use completion::{
    CompletionOptions, CompletionResult, CostEstimate, LensedResult, ProviderHealth, StopReason,
    ToolInvocation,
};
pub use cost::{estimate_dollars, price_for, CostRecord, ModelPrice};
pub use envelope::{
    ActiveContextSnapshot, ExpertJudgment, OptimizationMode, OrgContext, SecurityContext,
    TaskDefinition, TaskEnvelope,
};
pub use event::{Event, TelemetryEvent, TelemetryKind};
pub use interrupt::{InterruptReason, InterruptRecord};
pub use memory::{CoreMemoryRecord, DecisionLogEntry, KnowledgeEdge, KnowledgeNode, SkillRecord};
pub use message::{
    external_data_open, MessageSource, Role, SanitizedInput, TaggedMessage, EXTERNAL_DATA_CLOSE,
};
pub use policy::{
    ConfidenceAction, ConfidenceRange, Constraint, ConstraintCategory, Trigger, TriggerAction,
};
pub use task::TaskStatus;
