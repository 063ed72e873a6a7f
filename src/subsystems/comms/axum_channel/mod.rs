//! Axum-based HTTP channel: the REST API and the OpenAI-compatible API.
//!
//! It implements [`Component`] so it slots into the comms subsystem
//! lifecycle: `run()` drives the axum event loop and the shared
//! [`CancellationToken`] is wired to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET    /health
//! GET    /api/v1/health
//! GET    /api/tree                             (component tree)
//! POST   /api/v1/chat
//! POST   /api/v1/chat/completions              (OpenAI compatible)
//! GET    /api/v1/models
//! GET    /api/v1/models/{model_id}
//! POST   /api/v1/multi-agent/tasks
//! GET    /api/v1/multi-agent/agents
//! GET    /api/v1/multi-agent/agents/{agent_id}
//! GET    /api/v1/multi-agent/statistics
//! GET    /api/v1/memory/sessions
//! GET    /api/v1/memory/sessions/{session_id}
//! DELETE /api/v1/memory/sessions/{session_id}
//! GET    /api/v1/memory/sessions/{session_id}/export
//! GET    /api/v1/memory/stats
//! DELETE /api/v1/memory
//! POST   /api/v1/knowledge/upload              (multipart: file, metadata)
//! POST   /api/v1/knowledge/add-text
//! POST   /api/v1/knowledge/search
//! GET    /api/v1/knowledge/stats
//! DELETE /api/v1/knowledge/clear
//! GET    /api/v1/knowledge/supported-formats
//! POST   /api/v1/decision
//! POST   /api/v1/recommendations/questions
//! POST   /api/v1/recommendations/feedback
//! GET    /api/v1/recommendations/stats
//! GET    /api/v1/recommendations/session/{session_id}/feedback
//! GET    /api/v1/recommendations/trends?limit=N
//! POST   /api/v1/ratings
//! GET    /api/v1/ratings/stats
//! GET    /api/v1/ratings/weights
//! PUT    /api/v1/ratings/weights
//! ```

mod api;
mod insights;
mod knowledge;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

use super::state::CommsState;

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone: all fields are reference-counted or `Copy`.
#[derive(Clone)]
pub(crate) struct AxumState {
    /// Channel identifier passed to the chat flow and used in log spans.
    pub channel_id: Arc<str>,
    pub comms: Arc<CommsState>,
    /// Required key when API key auth is on.
    pub api_key: Option<Arc<str>>,
    /// Bound on chat and task requests.
    pub request_timeout: Duration,
    /// Model name reported by the OpenAI-compatible routes.
    pub model: Arc<str>,
}

pub struct AxumChannel {
    bind_addr: String,
    state: AxumState,
}

impl AxumChannel {
    pub(crate) fn new(bind_addr: impl Into<String>, state: AxumState) -> Self {
        Self { bind_addr: bind_addr.into(), state }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.state.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(self.bind_addr, self.state, shutdown))
    }
}

async fn run_axum(bind_addr: String, state: AxumState, shutdown: CancellationToken) -> Result<(), AppError> {
    let channel_id = state.channel_id.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

pub(crate) fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/health",                                   get(api::health))
        .route("/api/v1/health",                            get(api::health))
        .route("/api/tree",                                 get(api::tree))
        .route("/api/v1/chat",                              post(api::chat))
        .route("/api/v1/chat/completions",                  post(openai::chat_completions))
        .route("/api/v1/models",                            get(openai::list_models))
        .route("/api/v1/models/{model_id}",                 get(openai::get_model))
        .route("/api/v1/multi-agent/tasks",                 post(api::create_task))
        .route("/api/v1/multi-agent/agents",                get(api::list_agents))
        .route("/api/v1/multi-agent/agents/{agent_id}",     get(api::agent_detail))
        .route("/api/v1/multi-agent/statistics",            get(api::statistics))
        .route("/api/v1/memory/sessions",                   get(api::sessions))
        .route("/api/v1/memory/sessions/{session_id}",      get(api::session_detail).delete(api::session_delete))
        .route("/api/v1/memory/sessions/{session_id}/export", get(api::session_export))
        .route("/api/v1/memory/stats",                      get(api::memory_stats))
        .route("/api/v1/memory",                            delete(api::clear_memory))
        .route("/api/v1/knowledge/upload",                  post(knowledge::upload))
        .route("/api/v1/knowledge/add-text",                post(knowledge::add_text))
        .route("/api/v1/knowledge/search",                  post(knowledge::search))
        .route("/api/v1/knowledge/stats",                   get(knowledge::stats))
        .route("/api/v1/knowledge/clear",                   delete(knowledge::clear))
        .route("/api/v1/knowledge/supported-formats",       get(knowledge::formats))
        .route("/api/v1/decision",                          post(insights::decide))
        .route("/api/v1/recommendations/questions",         post(insights::recommend))
        .route("/api/v1/recommendations/feedback",          post(insights::feedback))
        .route("/api/v1/recommendations/stats",             get(insights::feedback_stats))
        .route("/api/v1/recommendations/session/{session_id}/feedback", get(insights::session_feedback))
        .route("/api/v1/recommendations/trends",            get(insights::trends))
        .route("/api/v1/ratings",                           post(insights::submit_rating))
        .route("/api/v1/ratings/stats",                     get(insights::rating_stats))
        .route("/api/v1/ratings/weights",                   get(insights::weights).put(insights::set_weights))
        .layer(middleware::from_fn_with_state(state.clone(), api::require_api_key))
        .with_state(state)
}
