//! Provider completion results and the lensed result the router returns.

use serde::{Deserialize, Serialize};

use crate::policy::ConfidenceAction;

/// Why the model stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A capability invocation surfaced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub description: String,
}

/// Options for one completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Set for sensitive tasks; only local-capable providers qualify
    pub requires_local_only: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            requires_local_only: false,
        }
    }
}

/// Pre-flight cost estimate from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub dollars: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Provider self-reported health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

impl ProviderHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// What a provider returns for one completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    pub model: String,
    pub provider_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub dollars: f64,
    pub latency_ms: u64,
    pub stop_reason: StopReason,
    /// Model-reported confidence when the provider surfaces logprobs
    pub confidence: Option<f64>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl CompletionResult {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn had_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The router's output: completion plus the expert-judgment verdict.
/// The router never returns a raw string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensedResult {
    pub completion: CompletionResult,
    pub confidence: f64,
    pub constraint_violation: bool,
    /// Ids of the constraints the output violated
    pub violated_constraints: Vec<String>,
    pub escalate: bool,
    /// Ids of the triggers whose patterns matched
    pub matched_triggers: Vec<String>,
    pub requires_review: bool,
    pub action: ConfidenceAction,
}

impl LensedResult {
    pub fn content(&self) -> &str {
        &self.completion.content
    }
}
