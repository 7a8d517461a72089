//! WebSocket channel: task submission in, per-task event stream out.
//!
//! Client messages: `{type:"task", payload:{task, agent?}}` submits a
//! single-node DAG and streams that task's events back; `approve` /
//! `decline` resolve the task's pending approval row.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use steward_orchestrator::TaskSubmission;
use steward_types::{ApprovalStatus, TaskDefinition};

use crate::state::SharedState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Task { payload: TaskPayload },
    Approve {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    Decline {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct TaskPayload {
    task: String,
    #[serde(default)]
    #[allow(dead_code)]
    agent: Option<String>,
}

pub async fn handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| connection(socket, state))
}

async fn connection(socket: WebSocket, state: SharedState) {
    let (mut sink, mut source) = socket.split();
    // All outbound frames funnel through one channel so event forwarders
    // and command replies cannot interleave partial writes.
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = source.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Task { payload }) => {
                submit_and_stream(&state, payload, tx.clone()).await;
            }
            Ok(ClientMessage::Approve { task_id }) => {
                resolve_approval(&state, &task_id, true, tx.clone()).await;
            }
            Ok(ClientMessage::Decline { task_id }) => {
                resolve_approval(&state, &task_id, false, tx.clone()).await;
            }
            Err(e) => {
                let _ = tx
                    .send(
                        serde_json::json!({
                            "type": "error",
                            "message": format!("invalid message: {e}"),
                            "is_interrupt": false,
                        })
                        .to_string(),
                    )
                    .await;
            }
        }
    }

    writer.abort();
}

/// Submit a one-node DAG and forward its events until terminal.
async fn submit_and_stream(state: &SharedState, payload: TaskPayload, tx: mpsc::Sender<String>) {
    state.metrics.record_submission();
    let submission = TaskSubmission::new(TaskDefinition::new(payload.task));
    let ids = match state.orchestrator.submit_tasks(vec![submission]).await {
        Ok(ids) => ids,
        Err(e) => {
            let _ = tx
                .send(
                    serde_json::json!({
                        "type": "error",
                        "message": e.to_string(),
                        "is_interrupt": false,
                    })
                    .to_string(),
                )
                .await;
            return;
        }
    };
    let task_id = ids[0].clone();
    let mut events = state.orchestrator.events().subscribe(&task_id).await;

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let terminal = event.is_terminal();
            // The wire shape is the event union plus the task id.
            let mut value = match serde_json::to_value(&event) {
                Ok(value) => value,
                Err(_) => break,
            };
            if let Some(map) = value.as_object_mut() {
                map.insert("taskId".into(), serde_json::Value::String(task_id.clone()));
            }
            if tx.send(value.to_string()).await.is_err() || terminal {
                break;
            }
        }
    });
}

/// Resolve the task's pending approval row on behalf of the operator.
async fn resolve_approval(state: &SharedState, task_id: &str, approve: bool, tx: mpsc::Sender<String>) {
    let outcome = async {
        let row = state
            .approval_queue
            .pending_for_task(task_id)
            .await?
            .ok_or_else(|| steward_storage::StorageError::NotFound(task_id.to_string()))?;
        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        state
            .approval_queue
            .resolve(row.id, status, "operator:ws", None, None)
            .await?;
        Ok::<_, steward_storage::StorageError>(())
    }
    .await;

    let reply = match outcome {
        Ok(()) => serde_json::json!({
            "type": "status",
            "message": format!(
                "task {task_id} {}",
                if approve { "approved" } else { "declined" }
            ),
        }),
        Err(e) => serde_json::json!({
            "type": "error",
            "message": e.to_string(),
            "is_interrupt": false,
        }),
    };
    let _ = tx.send(reply.to_string()).await;
}
