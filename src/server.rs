//! HTTP surface for the agent runtime.
//!
//! Exposes the agent and corpus statistics as a JSON API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/agent/task` | Run one agent task to completion |
//! | `GET`  | `/stats` | Collection statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "prompt must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `cancelled` (408), `max_iterations`
//! (422), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.
//!
//! When started with a sync interval, the server also runs the ingestion
//! pipeline periodically on a background task; a failed run is logged and
//! the next tick proceeds normally.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{AgentOrchestrator, TaskError, TaskOutcome};
use crate::ingest::IngestionPipeline;
use crate::models::StoreStats;
use crate::vector_store::DocumentStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    agent: Arc<AgentOrchestrator>,
    store: DocumentStore,
}

/// Start the HTTP server, optionally with a periodic background sync.
///
/// Runs until the process is terminated.
pub async fn run_server(
    bind: &str,
    agent: Arc<AgentOrchestrator>,
    store: DocumentStore,
    periodic_sync: Option<(Arc<IngestionPipeline>, u64)>,
) -> anyhow::Result<()> {
    if let Some((pipeline, interval_secs)) = periodic_sync {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = pipeline.run().await {
                    eprintln!("Warning: scheduled sync failed: {}", e);
                }
            }
        });
    }

    let state = AppState { agent, store };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/agent/task", post(handle_task))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("agent server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code.
    code: String,
    /// Human-readable message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        let status = match &err {
            TaskError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TaskError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            TaskError::MaxIterations(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::ModelFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ POST /agent/task ============

/// JSON request body for `POST /agent/task`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest {
    /// The user's natural-language task.
    prompt: String,
    /// Iteration bound, 1..=10. Defaults to 5.
    #[serde(default)]
    max_iterations: Option<usize>,
}

/// JSON response body for `POST /agent/task`.
#[derive(Serialize)]
struct TaskResponse {
    success: bool,
    data: TaskOutcome,
    message: String,
}

async fn handle_task(
    State(state): State<AppState>,
    Json(req): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, AppError> {
    let max_iterations = req.max_iterations.unwrap_or(5);
    if !(1..=10).contains(&max_iterations) {
        return Err(bad_request("maxIterations must be in 1..=10"));
    }

    let outcome = state
        .agent
        .execute_task(&req.prompt, max_iterations, None)
        .await?;

    Ok(Json(TaskResponse {
        success: true,
        data: outcome,
        message: "Task completed".to_string(),
    }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    state
        .store
        .stats()
        .await
        .map(Json)
        .map_err(|e| internal_error(e.to_string()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
