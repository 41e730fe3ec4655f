//! HTTP surface: task submission and status.

use crate::db::Database;
use crate::error::QueueError;
use crate::types::{Task, TaskState};
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    db: Database,
}

/// Error wrapper mapping the queue taxonomy onto HTTP statuses.
struct ApiError(QueueError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(QueueError::StoreUnavailable(err.to_string()))
    }
}

#[derive(Deserialize)]
struct ScheduleRequest {
    command: String,
    /// RFC 3339 timestamp, e.g. `2026-08-29T12:00:00Z`.
    scheduled_at: String,
}

#[derive(Serialize)]
struct ScheduleResponse {
    task_id: String,
    command: String,
    /// Echoed back as epoch seconds.
    scheduled_at: i64,
}

#[derive(Deserialize)]
struct StatusParams {
    task_id: String,
}

#[derive(Serialize)]
struct StatusResponse {
    task_id: String,
    command: String,
    state: TaskState,
    scheduled_at: String,
    picked_at: String,
    started_at: String,
    completed_at: String,
    failed_at: String,
    miss_count: i32,
}

fn render_ts(ms: Option<i64>) -> String {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

impl From<Task> for StatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            command: task.command,
            state: task.state,
            scheduled_at: render_ts(Some(task.scheduled_at)),
            picked_at: render_ts(task.picked_at),
            started_at: render_ts(task.started_at),
            completed_at: render_ts(task.completed_at),
            failed_at: render_ts(task.failed_at),
            miss_count: task.miss_count,
        }
    }
}

async fn schedule_task(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    // Malformed or incomplete bodies are a client error, uniformly 400.
    let Json(req) = payload
        .map_err(|e| ApiError(QueueError::InvalidInput(format!("invalid request body: {e}"))))?;

    if req.command.trim().is_empty() {
        return Err(ApiError(QueueError::InvalidInput(
            "command must not be empty".into(),
        )));
    }

    let scheduled_at = DateTime::parse_from_rfc3339(&req.scheduled_at)
        .map_err(|e| {
            ApiError(QueueError::InvalidInput(format!(
                "scheduled_at is not a valid RFC 3339 timestamp: {e}"
            )))
        })?
        .timestamp_millis();

    let task = state.db.insert_task(&req.command, scheduled_at)?;
    info!(task_id = %task.id, scheduled_at, "Task scheduled");

    Ok((
        StatusCode::CREATED,
        Json(ScheduleResponse {
            task_id: task.id,
            command: task.command,
            scheduled_at: scheduled_at / 1000,
        }),
    ))
}

async fn task_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    let task = state
        .db
        .get_task(&params.task_id)?
        .ok_or_else(|| ApiError(QueueError::NotFound(params.task_id.clone())))?;

    Ok(Json(StatusResponse::from(task)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let mut counts = serde_json::Map::new();
    for s in [
        TaskState::Scheduled,
        TaskState::Picked,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
    ] {
        counts.insert(s.as_str().to_string(), state.db.count_in_state(s)?.into());
    }
    Ok(Json(json!({ "tasks": counts })))
}

pub fn build_router(db: Database) -> Router {
    let state = AppState { db };

    Router::new()
        .route("/schedule", post(schedule_task))
        .route("/status", get(task_status))
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the shutdown signal flips to true.
pub async fn start_server(db: Database, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = build_router(db);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Only a true value means shutdown; a dropped sender does too.
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
