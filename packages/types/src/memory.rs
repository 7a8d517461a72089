//! Records for core memory, decisions, skills and the knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One core-memory record served by the `/api/memory` surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMemoryRecord {
    pub id: Uuid,
    /// Record kind (note, fact, preference, ...)
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl CoreMemoryRecord {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// One decision-log entry, appended on every terminal task state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub summary: String,
    pub outcome: String,
    pub created_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        summary: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            summary: summary.into(),
            outcome: outcome.into(),
            created_at: Utc::now(),
        }
    }
}

/// An installed skill, managed over `/api/skills`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub name: String,
    pub source: String,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
}

/// Knowledge-graph node. Edges may form cycles; traversal uses a visited
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: String,
    pub label: String,
    pub content: String,
}

/// Directed knowledge-graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
}
