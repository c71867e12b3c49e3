//! HTTP triggers for the ingestion pipeline.
//!
//! Two ways in: the cron endpoint (due feeds, optionally guarded by a shared
//! secret) and the manual endpoint (one feed by id, or every active feed).
//! Both answer with JSON built from the pipeline's result types.

mod auth;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{BatchScope, CancelHandle, Orchestrator, RunSignal};

pub use auth::{require_cron_secret, CronAuth};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Deadline for one trigger invocation; `None` means unbounded
    pub run_budget: Option<Duration>,
    /// Cancelled on shutdown so in-flight runs stop at their next checkpoint
    pub shutdown: Arc<CancelHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, run_budget: Option<Duration>) -> Self {
        Self {
            orchestrator,
            run_budget,
            shutdown: Arc::new(CancelHandle::new()),
        }
    }

    fn signal(&self) -> RunSignal {
        RunSignal::with_budget(self.run_budget).cancellable_by(&self.shutdown)
    }
}

/// JSON error body: `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CronResponse {
    success: bool,
    imported: usize,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessRequest {
    feed_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
}

pub fn build_app(state: AppState, auth: CronAuth) -> Router {
    let cron_routes = Router::new()
        .route(
            "/api/cron/fetch-feeds",
            get(cron_fetch_feeds).post(cron_fetch_feeds),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            auth,
            require_cron_secret,
        ));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/feeds/process", post(process_feeds))
        .merge(cron_routes)
        .with_state(state)
}

async fn health() -> Json<HealthData> {
    Json(HealthData { status: "ok" })
}

async fn cron_fetch_feeds(State(state): State<AppState>) -> Result<Json<CronResponse>, ApiError> {
    let signal = state.signal();
    let batch = state
        .orchestrator
        .run_batch(BatchScope::Due, &signal)
        .await
        .map_err(|e| {
            tracing::error!(kind = e.kind(), error = %e, "Cron batch failed");
            ApiError::internal(e.to_string())
        })?;

    Ok(Json(CronResponse {
        success: true,
        imported: batch.total_imported,
        timestamp: Utc::now(),
    }))
}

async fn process_feeds(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = parse_process_request(&body)?;
    let signal = state.signal();

    match request.feed_id {
        Some(feed_id) => {
            let result = state
                .orchestrator
                .run_feed_by_id(feed_id, &signal)
                .await
                .map_err(|e| {
                    tracing::error!(feed_id, kind = e.kind(), error = %e, "Manual feed run failed");
                    ApiError::internal(e.to_string())
                })?
                .ok_or_else(|| {
                    ApiError::new(StatusCode::NOT_FOUND, format!("feed {feed_id} not found"))
                })?;
            Ok(Json(result).into_response())
        }
        None => {
            let batch = state
                .orchestrator
                .run_batch(BatchScope::All, &signal)
                .await
                .map_err(|e| {
                    tracing::error!(kind = e.kind(), error = %e, "Manual batch failed");
                    ApiError::internal(e.to_string())
                })?;
            Ok(Json(batch).into_response())
        }
    }
}

/// An empty (or whitespace-only) body means "all feeds". Anything else must
/// be a JSON object; serde would otherwise accept `[7]` as a struct.
fn parse_process_request(body: &[u8]) -> Result<ProcessRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ProcessRequest::default());
    }
    let invalid = |e: serde_json::Error| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    };
    let value: serde_json::Value = serde_json::from_slice(body).map_err(invalid)?;
    if !value.is_object() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid request body: expected a JSON object",
        ));
    }
    serde_json::from_value(value).map_err(invalid)
}
