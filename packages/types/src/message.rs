//! Source-tagged messages.
//!
//! Every message that reaches a provider carries both a chat role and a
//! source-origin tag. Content tagged [`MessageSource::External`] is data,
//! never instructions: the router demotes it to the user channel and wraps
//! it in explicit data delimiters so the model cannot mistake it for
//! commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat role as understood by completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Where a message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// Produced by the runtime itself (constraint blocks, breaker warnings)
    System,
    /// Typed by the founder/operator
    Founder,
    /// Part of the task specification
    Task,
    /// Crossed the process boundary from the outside world
    External,
}

/// Role + content + source-origin triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedMessage {
    pub role: Role,
    pub content: String,
    pub source: MessageSource,
}

impl TaggedMessage {
    pub fn new(role: Role, content: impl Into<String>, source: MessageSource) -> Self {
        Self {
            role,
            content: content.into(),
            source,
        }
    }

    /// A system-role message originating from the runtime.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, MessageSource::System)
    }

    /// A user-role message carrying task content.
    pub fn task(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageSource::Task)
    }

    /// A user-role message typed by the founder.
    pub fn founder(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageSource::Founder)
    }

    /// An assistant-role message (prior model output).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, MessageSource::System)
    }

    /// A user-role message whose content crossed the process boundary.
    pub fn external(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageSource::External)
    }

    pub fn is_external(&self) -> bool {
        self.source == MessageSource::External
    }
}

/// Opening delimiter for external content embedded in a prompt.
pub fn external_data_open(source_type: &str) -> String {
    format!("<<<EXTERNAL_DATA_BEGIN source={source_type}>>>")
}

/// Closing delimiter for external content embedded in a prompt.
pub const EXTERNAL_DATA_CLOSE: &str = "<<<EXTERNAL_DATA_END>>>";

/// External content after it has crossed the sanitization boundary.
///
/// The original bytes are preserved verbatim between the delimiters; the
/// scan only sets flags. Any content entering an LLM prompt from outside
/// the process must first become one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedInput {
    /// Raw content wrapped in BEGIN/END data delimiters
    pub content: String,
    /// Caller-declared origin (email, web, chat, ...)
    pub source_type: String,
    pub sanitized_at: DateTime<Utc>,
    /// At least one known injection pattern matched
    pub had_suspicious_patterns: bool,
    /// Which patterns matched, for the audit trail
    pub pattern_details: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_tag_sources() {
        assert_eq!(TaggedMessage::system("x").source, MessageSource::System);
        assert_eq!(TaggedMessage::task("x").source, MessageSource::Task);
        assert_eq!(TaggedMessage::external("x").source, MessageSource::External);
        assert!(TaggedMessage::external("x").is_external());
        assert!(!TaggedMessage::task("x").is_external());
    }

    #[test]
    fn delimiters_name_the_source() {
        assert_eq!(
            external_data_open("email"),
            "<<<EXTERNAL_DATA_BEGIN source=email>>>"
        );
    }
}
