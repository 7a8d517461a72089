//! SQLite-backed durable stores (`sql` feature).
//!
//! Complex fields are stored as JSON text; timestamps as RFC 3339 strings.
//! Rows that fail to deserialize are surfaced as `StorageError` rather
//! than silently dropped; the durable queue and audit log are the record
//! of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use steward_types::{
    AdaptiveAuditRow, AdaptiveParams, ApprovalRow, ApprovalStatus, DecisionLogEntry,
    TelemetryEvent,
};

use crate::{
    AdaptiveStore, ApprovalQueueStore, DecisionLogStore, StorageError, StorageResult,
    TelemetryStore,
};

/// Create every table the durable stores need. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> StorageResult<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS approval_queue (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            resolved_by TEXT,
            resolved_at TEXT,
            correction TEXT,
            correction_incorporated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS telemetry_events (
            id TEXT PRIMARY KEY,
            task_id TEXT,
            agent_id TEXT,
            event_type TEXT NOT NULL,
            success INTEGER NOT NULL,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS adaptive_policy_store (
            key TEXT NOT NULL,
            version INTEGER NOT NULL,
            active INTEGER NOT NULL,
            params TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (key, version)
        );
        CREATE TABLE IF NOT EXISTS adaptive_audit_log (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL,
            row_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS decision_log (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            outcome TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Unavailable(format!("bad timestamp in row: {e}")))
}

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
}

fn parse_status(raw: &str) -> StorageResult<ApprovalStatus> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(StorageError::Unavailable(format!(
            "unknown approval status: {other}"
        ))),
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ApprovalRow> {
    let id: String = row.get("id");
    let resolved_at: Option<String> = row.get("resolved_at");
    Ok(ApprovalRow {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Unavailable(e.to_string()))?,
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        reason: row.get("reason"),
        status: parse_status(row.get::<String, _>("status").as_str())?,
        resolved_by: row.get("resolved_by"),
        resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
        correction: row.get("correction"),
        correction_incorporated: row.get::<i64, _>("correction_incorporated") != 0,
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
    })
}

/// SQLite approval queue.
pub struct SqliteApprovalQueue {
    pool: SqlitePool,
}

impl SqliteApprovalQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalQueueStore for SqliteApprovalQueue {
    async fn insert(&self, row: ApprovalRow) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO approval_queue \
             (id, task_id, agent_id, reason, status, resolved_by, resolved_at, correction, correction_incorporated, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id.to_string())
        .bind(&row.task_id)
        .bind(&row.agent_id)
        .bind(&row.reason)
        .bind(status_str(row.status))
        .bind(&row.resolved_by)
        .bind(row.resolved_at.map(|t| t.to_rfc3339()))
        .bind(&row.correction)
        .bind(row.correction_incorporated as i64)
        .bind(row.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<ApprovalRow>> {
        let row = sqlx::query("SELECT * FROM approval_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_approval).transpose()
    }

    async fn resolve(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        reason: Option<String>,
        correction: Option<String>,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE approval_queue \
             SET status = ?, resolved_by = ?, resolved_at = ?, \
                 reason = COALESCE(?, reason), correction = COALESCE(?, correction) \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status_str(status))
        .bind(resolved_by)
        .bind(Utc::now().to_rfc3339())
        .bind(reason)
        .bind(correction)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_correction_incorporated(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("UPDATE approval_queue SET correction_incorporated = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_for_task(&self, task_id: &str) -> StorageResult<Option<ApprovalRow>> {
        let row = sqlx::query(
            "SELECT * FROM approval_queue WHERE task_id = ? AND status = 'pending' \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_approval).transpose()
    }

    async fn list_pending(&self) -> StorageResult<Vec<ApprovalRow>> {
        let rows =
            sqlx::query("SELECT * FROM approval_queue WHERE status = 'pending' ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_approval).collect()
    }
}

/// SQLite telemetry log.
pub struct SqliteTelemetryStore {
    pool: SqlitePool,
}

impl SqliteTelemetryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn append(&self, event: TelemetryEvent) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO telemetry_events (id, task_id, agent_id, event_type, success, detail, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(&event.task_id)
        .bind(&event.agent_id)
        .bind(serde_json::to_string(&event.event_type)?)
        .bind(event.success as i64)
        .bind(serde_json::to_string(&event.detail)?)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<TelemetryEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM telemetry_events ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut events = rows
            .iter()
            .map(|row| -> StorageResult<TelemetryEvent> {
                let id: String = row.get("id");
                Ok(TelemetryEvent {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| StorageError::Unavailable(e.to_string()))?,
                    task_id: row.get("task_id"),
                    agent_id: row.get("agent_id"),
                    event_type: serde_json::from_str(row.get::<String, _>("event_type").as_str())?,
                    success: row.get::<i64, _>("success") != 0,
                    detail: serde_json::from_str(row.get::<String, _>("detail").as_str())?,
                    created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        events.reverse();
        Ok(events)
    }
}

/// SQLite adaptive-parameter store with audit log.
pub struct SqliteAdaptiveStore {
    pool: SqlitePool,
}

impl SqliteAdaptiveStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdaptiveStore for SqliteAdaptiveStore {
    async fn load_active(
        &self,
        company_id: &str,
        agent_id: &str,
        task_class: &str,
    ) -> StorageResult<Option<AdaptiveParams>> {
        let key = format!("{company_id}:{agent_id}:{task_class}");
        let row = sqlx::query(
            "SELECT params FROM adaptive_policy_store WHERE key = ? AND active = 1 \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>("params").as_str())?))
            .transpose()
    }

    async fn save_new_version(&self, mut params: AdaptiveParams) -> StorageResult<u32> {
        let key = params.key();
        // Read–deactivate–insert; callers serialize writes per key.
        let current: Option<i64> =
            sqlx::query("SELECT MAX(version) AS v FROM adaptive_policy_store WHERE key = ?")
                .bind(&key)
                .fetch_one(&self.pool)
                .await?
                .get("v");
        let next_version = (current.unwrap_or(0) + 1) as u32;
        params.version = next_version;

        sqlx::query("UPDATE adaptive_policy_store SET active = 0 WHERE key = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO adaptive_policy_store (key, version, active, params, created_at) \
             VALUES (?, ?, 1, ?, ?)",
        )
        .bind(&key)
        .bind(next_version as i64)
        .bind(serde_json::to_string(&params)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(next_version)
    }

    async fn append_audit(&self, row: AdaptiveAuditRow) -> StorageResult<()> {
        let key = format!("{}:{}:{}", row.company_id, row.agent_id, row.task_class);
        sqlx::query(
            "INSERT INTO adaptive_audit_log (id, key, row_json, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(row.id.to_string())
        .bind(key)
        .bind(serde_json::to_string(&row)?)
        .bind(row.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_rows(&self, limit: usize) -> StorageResult<Vec<AdaptiveAuditRow>> {
        let rows = sqlx::query(
            "SELECT row_json FROM adaptive_audit_log ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = rows
            .iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("row_json").as_str())?))
            .collect::<StorageResult<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }
}

/// SQLite decision log.
pub struct SqliteDecisionLog {
    pool: SqlitePool,
}

impl SqliteDecisionLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DecisionLogStore for SqliteDecisionLog {
    async fn append(&self, entry: DecisionLogEntry) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO decision_log (id, task_id, agent_id, summary, outcome, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.task_id)
        .bind(&entry.agent_id)
        .bind(&entry.summary)
        .bind(&entry.outcome)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StorageResult<Vec<DecisionLogEntry>> {
        let rows =
            sqlx::query("SELECT * FROM decision_log ORDER BY created_at DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        let mut out = rows
            .iter()
            .map(|row| -> StorageResult<DecisionLogEntry> {
                let id: String = row.get("id");
                Ok(DecisionLogEntry {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| StorageError::Unavailable(e.to_string()))?,
                    task_id: row.get("task_id"),
                    agent_id: row.get("agent_id"),
                    summary: row.get("summary"),
                    outcome: row.get("outcome"),
                    created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn approval_round_trip() {
        let queue = SqliteApprovalQueue::new(pool().await);
        let row = ApprovalRow::pending("t1", "a1", "external email");
        let id = row.id;
        queue.insert(row).await.unwrap();

        let pending = queue.pending_for_task("t1").await.unwrap().unwrap();
        assert_eq!(pending.id, id);

        queue
            .resolve(id, ApprovalStatus::Approved, "reviewer", None, Some("fix tone".into()))
            .await
            .unwrap();
        let resolved = queue.get(id).await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.correction.as_deref(), Some("fix tone"));
        assert!(resolved.resolved_at.is_some());
    }

    #[tokio::test]
    async fn adaptive_save_deactivates_previous() {
        let store = SqliteAdaptiveStore::new(pool().await);
        let params = AdaptiveParams::defaults("c1", "a1", "standard");
        assert_eq!(store.save_new_version(params.clone()).await.unwrap(), 1);
        assert_eq!(store.save_new_version(params).await.unwrap(), 2);

        let active = store
            .load_active("c1", "a1", "standard")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.version, 2);
    }

    #[tokio::test]
    async fn load_active_empty_returns_none() {
        let store = SqliteAdaptiveStore::new(pool().await);
        assert!(store
            .load_active("c1", "a1", "standard")
            .await
            .unwrap()
            .is_none());
    }
}
