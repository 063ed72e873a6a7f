//! Axum handlers for the REST routes.
//!
//! Management routes (`/health`, `/api/tree`) return their JSON as is.  Every
//! other route wraps it in the `{code, message, data}` envelope.  Every bus call is bounded by a
//! timeout; see [`ApiError`] for the status mapping.

use std::future::Future;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::subsystems::comms::state::{CommsError, CommsState};
use crate::supervisor::bus::{BusPayload, ERR_INVALID_PARAMS, ERR_NOT_FOUND};

use super::AxumState;

const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(3);
pub(super) const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(super) enum ApiError {
    /// Request body failed validation.
    Unprocessable(String),
    Unauthorized,
    Timeout(&'static str),
    Comms(CommsError),
}

impl From<CommsError> for ApiError {
    fn from(e: CommsError) -> Self {
        ApiError::Comms(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid or missing API key".to_string()),
            ApiError::Timeout(what) => (StatusCode::GATEWAY_TIMEOUT, format!("{what} timed out")),
            ApiError::Comms(CommsError::Bus(e)) if e.code == ERR_NOT_FOUND => (StatusCode::NOT_FOUND, e.message),
            ApiError::Comms(CommsError::Bus(e)) if e.code == ERR_INVALID_PARAMS => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.message)
            }
            ApiError::Comms(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
        };
        let body = json!({ "code": status.as_u16(), "message": message, "data": Value::Null });
        (status, Json(body)).into_response()
    }
}

/// Run `fut` under `limit`; `what` names the request in errors and logs.
pub(super) async fn bounded<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T, CommsError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => {
            warn!(request = what, error = %e, "bus request failed");
            Err(e.into())
        }
        Err(_) => {
            warn!(request = what, timeout_s = limit.as_secs(), "bus request timed out");
            Err(ApiError::Timeout(what))
        }
    }
}

pub(super) fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "code": 0, "message": "success", "data": data }))
}

pub(super) async fn query(comms: &CommsState, what: &'static str, method: &str, payload: BusPayload) -> Result<Json<Value>, ApiError> {
    bounded(QUERY_TIMEOUT, what, comms.query(method, payload)).await.map(envelope)
}

// ── Auth ──────────────────────────────────────────────────────────────────────

/// Reject requests without the configured key.  `/health` stays open.
pub(super) async fn require_api_key(State(state): State<AxumState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    let headers = req.headers();
    let supplied = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });
    if supplied == Some(expected) {
        next.run(req).await
    } else {
        debug!(path = %req.uri().path(), "rejected request without valid API key");
        ApiError::Unauthorized.into_response()
    }
}

// ── Management ────────────────────────────────────────────────────────────────

/// GET /health, GET /api/v1/health
pub(super) async fn health(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    bounded(MANAGEMENT_TIMEOUT, "health", state.comms.health()).await.map(Json)
}

/// GET /api/tree
pub(super) async fn tree(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    bounded(MANAGEMENT_TIMEOUT, "component tree", state.comms.component_tree()).await.map(Json)
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ChatBody {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    /// Accepted for client compatibility; per-request overrides are not applied.
    #[serde(default)]
    config: Option<Value>,
}

/// POST /api/v1/chat
pub(super) async fn chat(State(state): State<AxumState>, Json(body): Json<ChatBody>) -> Result<Json<Value>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::Unprocessable("message must not be empty".into()));
    }
    if body.config.is_some() {
        debug!("ignoring per-request chat config");
    }
    let started = std::time::Instant::now();
    let reply = bounded(
        state.request_timeout,
        "chat",
        state.comms.send_message(&state.channel_id, body.message, body.session_id, vec![]),
    )
    .await?;
    info!(session_id = %reply.session_id, elapsed_ms = started.elapsed().as_millis() as u64, "chat request completed");
    Ok(envelope(json!({
        "response": reply.reply,
        "session_id": reply.session_id,
        "metadata": reply.metadata,
    })))
}

// ── Multi-agent ───────────────────────────────────────────────────────────────

/// POST /api/v1/multi-agent/tasks
pub(super) async fn create_task(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let described = body["description"].as_str().is_some_and(|d| !d.trim().is_empty());
    if !described {
        return Err(ApiError::Unprocessable("description must be a non-empty string".into()));
    }
    bounded(state.request_timeout, "multi-agent task", state.comms.run_task(&body)).await.map(envelope)
}

/// GET /api/v1/multi-agent/agents
pub(super) async fn list_agents(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "agent list", "agents/list", BusPayload::Empty).await
}

/// GET /api/v1/multi-agent/agents/{agent_id}
pub(super) async fn agent_detail(
    State(state): State<AxumState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    bounded(QUERY_TIMEOUT, "agent detail", state.comms.agent_detail(&agent_id)).await.map(envelope)
}

/// GET /api/v1/multi-agent/statistics
pub(super) async fn statistics(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "agent statistics", "agents/statistics", BusPayload::Empty).await
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// GET /api/v1/memory/sessions
pub(super) async fn sessions(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "session list", "agents/sessions", BusPayload::Empty).await
}

/// GET /api/v1/memory/sessions/{session_id}
pub(super) async fn session_detail(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    bounded(QUERY_TIMEOUT, "session detail", state.comms.session("detail", &session_id)).await.map(envelope)
}

/// GET /api/v1/memory/sessions/{session_id}/export
pub(super) async fn session_export(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    bounded(QUERY_TIMEOUT, "session export", state.comms.session("export", &session_id)).await.map(envelope)
}

/// DELETE /api/v1/memory/sessions/{session_id}
pub(super) async fn session_delete(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    bounded(QUERY_TIMEOUT, "session delete", state.comms.session("delete", &session_id)).await.map(envelope)
}

/// GET /api/v1/memory/stats
pub(super) async fn memory_stats(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "memory stats", "agents/memory/stats", BusPayload::Empty).await
}

/// DELETE /api/v1/memory
pub(super) async fn clear_memory(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "memory clear", "agents/memory/clear", BusPayload::Empty).await
}
