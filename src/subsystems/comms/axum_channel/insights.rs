//! Decision, recommendation and answer-rating routes.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::Value;

use crate::supervisor::bus::BusPayload;

use super::AxumState;
use super::api::{ApiError, bounded, envelope, query};

fn json_request(body: &Value) -> BusPayload {
    BusPayload::JsonRequest { data: body.to_string() }
}

/// Bus call that may involve the LLM, bounded by the request timeout.
async fn slow_query(state: &AxumState, what: &'static str, method: &str, body: &Value) -> Result<Json<Value>, ApiError> {
    bounded(state.request_timeout, what, state.comms.query(method, json_request(body))).await.map(envelope)
}

// ── Decision ──────────────────────────────────────────────────────────────────

/// POST /api/v1/decision
pub(super) async fn decide(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    if !body["query"].as_str().is_some_and(|q| !q.trim().is_empty()) {
        return Err(ApiError::Unprocessable("query must be a non-empty string".into()));
    }
    slow_query(&state, "decision", "agents/decide", &body).await
}

// ── Recommendations ───────────────────────────────────────────────────────────

/// POST /api/v1/recommendations/questions
pub(super) async fn recommend(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    slow_query(&state, "recommendation", "agents/recommend", &body).await
}

/// POST /api/v1/recommendations/feedback
pub(super) async fn feedback(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "recommendation feedback", "agents/recommend/feedback", json_request(&body)).await
}

/// GET /api/v1/recommendations/stats
pub(super) async fn feedback_stats(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "feedback stats", "agents/recommend/stats", BusPayload::Empty).await
}

/// GET /api/v1/recommendations/session/{session_id}/feedback
pub(super) async fn session_feedback(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let payload = BusPayload::SessionQuery { session_id };
    query(&state.comms, "session feedback", "agents/recommend/session", payload).await
}

#[derive(Deserialize)]
pub(super) struct TrendsParams {
    limit: Option<usize>,
}

/// GET /api/v1/recommendations/trends?limit=N
pub(super) async fn trends(
    State(state): State<AxumState>,
    Query(params): Query<TrendsParams>,
) -> Result<Json<Value>, ApiError> {
    let payload = match params.limit {
        Some(0) => return Err(ApiError::Unprocessable("limit must be at least 1".into())),
        Some(limit) => json_request(&serde_json::json!({ "limit": limit })),
        None => BusPayload::Empty,
    };
    query(&state.comms, "feedback trends", "agents/recommend/trends", payload).await
}

// ── Ratings ───────────────────────────────────────────────────────────────────

/// POST /api/v1/ratings
pub(super) async fn submit_rating(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "rating submit", "agents/ratings/submit", json_request(&body)).await
}

/// GET /api/v1/ratings/stats
pub(super) async fn rating_stats(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "rating stats", "agents/ratings/stats", BusPayload::Empty).await
}

/// GET /api/v1/ratings/weights
pub(super) async fn weights(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "rating weights", "agents/ratings/weights", BusPayload::Empty).await
}

/// PUT /api/v1/ratings/weights
pub(super) async fn set_weights(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "rating weights update", "agents/ratings/weights", json_request(&body)).await
}
