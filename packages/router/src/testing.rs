//! Scripted provider for tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use steward_types::{
    estimate_dollars, CompletionOptions, CompletionResult, CostEstimate, StopReason,
    TaggedMessage, ToolInvocation,
};

use crate::classify::TaskProfile;
use crate::provider::CompletionProvider;
use crate::RouterError;

/// One call as the provider saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<TaggedMessage>,
}

/// One scripted turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub confidence: Option<f64>,
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_tool_call(mut self, tool: impl Into<String>, description: impl Into<String>) -> Self {
        self.tool_calls.push(ToolInvocation {
            tool: tool.into(),
            description: description.into(),
        });
        self
    }
}

/// A provider that replays scripted turns. The last turn repeats once the
/// script is exhausted, which makes duplicate-output scenarios trivial to
/// drive.
pub struct ScriptedProvider {
    id: String,
    model: String,
    turns: Vec<ScriptedTurn>,
    local_only: bool,
    fail_with: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
    cursor: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, turns: Vec<ScriptedTurn>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            model: "claude-haiku-4-5".into(),
            turns,
            local_only: false,
            fail_with: None,
            calls: Mutex::new(Vec::new()),
            cursor: Mutex::new(0),
        })
    }

    /// A provider that answers every call with the same text.
    pub fn repeating(id: impl Into<String>, content: impl Into<String>) -> Arc<Self> {
        Self::new(id, vec![ScriptedTurn::text(content)])
    }

    /// A provider whose every call fails.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            model: "claude-haiku-4-5".into(),
            turns: Vec::new(),
            local_only: false,
            fail_with: Some(message.into()),
            calls: Mutex::new(Vec::new()),
            cursor: Mutex::new(0),
        })
    }

    pub fn local(id: impl Into<String>, turns: Vec<ScriptedTurn>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            model: "llama-3.3-70b-local".into(),
            turns,
            local_only: true,
            fail_with: None,
            calls: Mutex::new(Vec::new()),
            cursor: Mutex::new(0),
        })
    }

    /// Calls seen by the provider, in order.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn can_handle(&self, _profile: &TaskProfile) -> bool {
        true
    }

    fn local_only_capable(&self) -> bool {
        self.local_only
    }

    fn estimate_cost(&self, prompt_chars: usize, max_tokens: u32) -> CostEstimate {
        let input_tokens = (prompt_chars / 4) as u64;
        CostEstimate {
            dollars: estimate_dollars(&self.model, input_tokens, max_tokens as u64),
            input_tokens,
            output_tokens: max_tokens as u64,
        }
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[TaggedMessage],
        _options: &CompletionOptions,
    ) -> Result<CompletionResult, RouterError> {
        self.calls.lock().push(RecordedCall {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
        });
        if let Some(message) = &self.fail_with {
            return Err(RouterError::ProviderFailure {
                provider_id: self.id.clone(),
                message: message.clone(),
            });
        }

        let mut cursor = self.cursor.lock();
        let turn = self
            .turns
            .get(*cursor)
            .or_else(|| self.turns.last())
            .cloned()
            .unwrap_or_else(|| ScriptedTurn::text(""));
        if *cursor + 1 < self.turns.len() {
            *cursor += 1;
        }

        let input_tokens = messages.iter().map(|m| m.content.len() as u64 / 4).sum();
        let output_tokens = (turn.content.len() as u64 / 4).max(1);
        Ok(CompletionResult {
            content: turn.content,
            tool_calls: turn.tool_calls,
            model: self.model.clone(),
            provider_id: self.id.clone(),
            input_tokens,
            output_tokens,
            dollars: estimate_dollars(&self.model, input_tokens, output_tokens),
            latency_ms: 5,
            stop_reason: StopReason::EndTurn,
            confidence: turn.confidence,
        })
    }
}
