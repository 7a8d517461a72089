//! Outbound client for the judgment training service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correction payload POSTed to `/training/correction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionPayload {
    pub agent_id: String,
    pub task_id: String,
    pub correction_content: String,
    pub correction_type: String,
    pub created_at: DateTime<Utc>,
}

/// Sink for reviewer corrections. The HTTP client is the production
/// implementation; tests substitute a recorder.
#[async_trait]
pub trait TrainingSink: Send + Sync {
    async fn submit_correction(&self, payload: CorrectionPayload) -> Result<(), reqwest::Error>;
}

/// HTTP client for the training service.
pub struct HttpTrainingClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTrainingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TrainingSink for HttpTrainingClient {
    async fn submit_correction(&self, payload: CorrectionPayload) -> Result<(), reqwest::Error> {
        let url = format!("{}/training/correction", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(task_id = %payload.task_id, "correction submitted to training service");
        Ok(())
    }
}
