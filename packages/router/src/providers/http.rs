//! OpenAI-compatible chat-completions provider over HTTP.
//!
//! Field names match the Chat Completions API; any endpoint speaking that
//! dialect (hosted or self-hosted) can sit behind this provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use steward_types::{
    estimate_dollars, CompletionOptions, CompletionResult, CostEstimate, Role, StopReason,
    TaggedMessage, ToolInvocation,
};

use crate::classify::TaskProfile;
use crate::provider::CompletionProvider;
use crate::RouterError;

/// Configuration for one HTTP provider instance.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Self-hosted endpoints keep content local
    pub local_only_capable: bool,
    pub timeout: Duration,
}

/// Chat-completions provider.
pub struct HttpCompletionProvider {
    config: HttpProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl HttpCompletionProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn can_handle(&self, _profile: &TaskProfile) -> bool {
        true
    }

    fn local_only_capable(&self) -> bool {
        self.config.local_only_capable
    }

    fn estimate_cost(&self, prompt_chars: usize, max_tokens: u32) -> CostEstimate {
        // Rough chars-per-token heuristic for pre-flight checks only; the
        // recorded cost uses provider-reported usage.
        let input_tokens = (prompt_chars / 4) as u64;
        let output_tokens = max_tokens as u64;
        CostEstimate {
            dollars: estimate_dollars(&self.config.model, input_tokens, output_tokens),
            input_tokens,
            output_tokens,
        }
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[TaggedMessage],
        options: &CompletionOptions,
    ) -> Result<CompletionResult, RouterError> {
        let mut wire_messages = vec![json!({ "role": "system", "content": system_prompt })];
        for m in messages {
            wire_messages.push(json!({
                "role": Self::role_str(m.role),
                "content": m.content,
            }));
        }
        let body = json!({
            "model": self.config.model,
            "messages": wire_messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RouterError::ProviderFailure {
                provider_id: self.config.id.clone(),
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| RouterError::ProviderFailure {
                provider_id: self.config.id.clone(),
                message: e.to_string(),
            })?;
        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| RouterError::ProviderFailure {
                    provider_id: self.config.id.clone(),
                    message: format!("malformed response: {e}"),
                })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::ProviderFailure {
                provider_id: self.config.id.clone(),
                message: "response carried no choices".into(),
            })?;
        let stop_reason = match choice.finish_reason.as_deref() {
            Some("length") => StopReason::MaxTokens,
            Some("stop_sequence") | Some("content_filter") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };
        let usage = parsed.usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let model = parsed.model.unwrap_or_else(|| self.config.model.clone());
        let dollars = estimate_dollars(&model, usage.prompt_tokens, usage.completion_tokens);

        Ok(CompletionResult {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|t| ToolInvocation {
                    tool: t.function.name,
                    description: t.function.arguments,
                })
                .collect(),
            model,
            provider_id: self.config.id.clone(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            dollars,
            latency_ms,
            stop_reason,
            confidence: None,
        })
    }
}
