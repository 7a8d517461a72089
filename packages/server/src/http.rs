//! HTTP API: health, status, task control, memory, skills, logs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use steward_types::InterruptReason;

use crate::skills::SkillError;
use crate::state::SharedState;
use crate::ws;

/// Build the full ingress router.
pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::handler))
        .route("/api/status", get(status))
        .route("/api/stop", post(stop))
        .route("/api/tasks/{id}/stop", post(task_stop))
        .route("/api/tasks/{id}/resume", post(task_resume))
        .route("/api/memory", get(memory_search))
        .route("/api/memory/{id}", get(memory_get).delete(memory_delete))
        .route("/api/skills", get(skills_list))
        .route("/api/skills/install", post(skills_install))
        .route("/api/skills/{name}/enable", post(skill_enable))
        .route("/api/skills/{name}/disable", post(skill_disable))
        .route("/api/skills/{name}", delete(skill_remove))
        .route("/api/logs", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    running: bool,
    model: String,
    uptime_secs: u64,
    active_tasks: Vec<String>,
    halted_tasks: Vec<String>,
    usage: UsageBlock,
    counters: CounterBlock,
}

#[derive(Debug, Serialize)]
struct UsageBlock {
    tokens: u64,
    cost: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CounterBlock {
    submitted: u64,
    completed: u64,
    failed: u64,
    interrupted: u64,
}

async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let (cost, tokens) = state.orchestrator.budget().session_totals();
    Json(StatusResponse {
        running: true,
        model: state.model.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_tasks: state.orchestrator.active_task_ids().await,
        halted_tasks: state.orchestrator.interrupts().list_halted().await,
        usage: UsageBlock { tokens, cost },
        counters: CounterBlock {
            submitted: state.metrics.tasks_submitted.load(Ordering::Relaxed),
            completed: state.metrics.tasks_completed.load(Ordering::Relaxed),
            failed: state.metrics.tasks_failed.load(Ordering::Relaxed),
            interrupted: state.metrics.tasks_interrupted.load(Ordering::Relaxed),
        },
    })
}

async fn stop(State(state): State<SharedState>) -> Json<serde_json::Value> {
    tracing::info!("shutdown requested over HTTP");
    state.orchestrator.shutdown();
    let _ = state.shutdown.send(true);
    Json(json!({ "stopping": true }))
}

#[derive(Debug, Default, Deserialize)]
struct StopBody {
    #[serde(default)]
    #[allow(dead_code)]
    force: Option<bool>,
}

async fn task_stop(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    body: Option<Json<StopBody>>,
) -> impl IntoResponse {
    let _ = body;
    if state.orchestrator.task_status(&task_id).await.is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown task" })));
    }
    match state
        .orchestrator
        .halt_task(&task_id, InterruptReason::User, None)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({ "halted": task_id }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn task_resume(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    if state.orchestrator.task_status(&task_id).await.is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown task" })));
    }
    match state.orchestrator.resume_task(&task_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "resumed": task_id }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct MemoryQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
}

async fn memory_search(
    State(state): State<SharedState>,
    Query(query): Query<MemoryQuery>,
) -> impl IntoResponse {
    match state
        .memory
        .search(
            query.q.as_deref(),
            query.kind.as_deref(),
            query.limit.unwrap_or(50),
        )
        .await
    {
        Ok(records) => (StatusCode::OK, Json(json!({ "records": records }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn memory_get(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" })));
    };
    match state.memory.get(id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(json!(record))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn memory_delete(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" })));
    };
    match state.memory.delete(id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "deleted": true }))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn skills_list(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({ "skills": state.skills.list() }))
}

#[derive(Debug, Deserialize)]
struct InstallBody {
    source: String,
    name: Option<String>,
}

async fn skills_install(
    State(state): State<SharedState>,
    Json(body): Json<InstallBody>,
) -> impl IntoResponse {
    match state.skills.install(&body.source, body.name.as_deref()) {
        Ok(record) => (StatusCode::CREATED, Json(json!(record))),
        Err(e) => (skill_error_status(&e), Json(json!({ "error": e.to_string() }))),
    }
}

async fn skill_enable(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    set_skill_enabled(state, &name, true)
}

async fn skill_disable(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    set_skill_enabled(state, &name, false)
}

fn set_skill_enabled(
    state: SharedState,
    name: &str,
    enabled: bool,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.skills.set_enabled(name, enabled) {
        Ok(()) => (StatusCode::OK, Json(json!({ "name": name, "enabled": enabled }))),
        Err(e) => (skill_error_status(&e), Json(json!({ "error": e.to_string() }))),
    }
}

async fn skill_remove(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.skills.remove(&name) {
        Ok(()) => (StatusCode::OK, Json(json!({ "removed": name }))),
        Err(e) => (skill_error_status(&e), Json(json!({ "error": e.to_string() }))),
    }
}

fn skill_error_status(error: &SkillError) -> StatusCode {
    match error {
        SkillError::AlreadyInstalled(_) => StatusCode::CONFLICT,
        SkillError::NotFound(_) => StatusCode::NOT_FOUND,
        SkillError::InvalidSource(_) => StatusCode::BAD_REQUEST,
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
    level: Option<String>,
    #[serde(rename = "taskId")]
    task_id: Option<String>,
}

async fn logs_tail(
    State(state): State<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.logs.tail(
        query.lines.unwrap_or(100),
        query.level.as_deref(),
        query.task_id.as_deref(),
    );
    Json(json!({ "logs": entries }))
}

async fn logs_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let stream = BroadcastStream::new(state.logs.subscribe()).filter_map(|entry| {
        entry.ok().and_then(|e| {
            serde_json::to_string(&e)
                .ok()
                .map(|json| Ok(SseEvent::default().data(json)))
        })
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
