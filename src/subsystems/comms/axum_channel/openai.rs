//! OpenAI-compatible routes: `/api/v1/chat/completions` and `/api/v1/models`.
//!
//! Completions are answered in one piece; `stream: true` is accepted and
//! answered the same way.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::ChatMessage;

use super::AxumState;
use super::api::{ApiError, bounded};

const OWNER: &str = "cus-agent";

#[derive(Debug, Deserialize)]
pub(super) struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletionRequest {
    #[serde(default)]
    model: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(default)]
    stream: bool,
    /// OpenAI's end-user id; used as the session id when present.
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Rough token count: half the characters plus the words.
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 2 + text.split_whitespace().count()) as u64
}

fn to_chat_message(m: &WireMessage) -> Option<ChatMessage> {
    match m.role.as_str() {
        "system" => Some(ChatMessage::system(&m.content)),
        "user" => Some(ChatMessage::user(&m.content)),
        "assistant" => Some(ChatMessage::assistant(&m.content)),
        _ => None,
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// POST /api/v1/chat/completions
///
/// The last user message is the new turn; everything before it seeds the
/// session when the session has no saved state.
pub(super) async fn chat_completions(
    State(state): State<AxumState>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(last_user) = req.messages.iter().rposition(|m| m.role == "user" && !m.content.trim().is_empty()) else {
        return Err(ApiError::Unprocessable("messages must contain a non-empty user message".into()));
    };
    if req.stream {
        warn!("streaming requested; replying with a single completion");
    }
    let model = req.model.clone().unwrap_or_else(|| state.model.to_string());
    let history: Vec<ChatMessage> = req.messages[..last_user].iter().filter_map(to_chat_message).collect();
    let content = req.messages[last_user].content.clone();
    let session_id = req.session_id.clone().or_else(|| req.user.clone());

    let reply = bounded(
        state.request_timeout,
        "chat completion",
        state.comms.send_message(&state.channel_id, content, session_id, history),
    )
    .await?;

    let prompt_text: Vec<&str> = req.messages.iter().map(|m| m.content.as_str()).collect();
    let prompt_tokens = estimate_tokens(&prompt_text.join("\n"));
    let completion_tokens = estimate_tokens(&reply.reply);
    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    info!(%id, %model, session_id = %reply.session_id, "completion served");

    Ok(Json(json!({
        "id": id,
        "object": "chat.completion",
        "created": unix_now(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply.reply },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    })))
}

fn model_entry(id: &str) -> Value {
    json!({ "id": id, "object": "model", "created": unix_now(), "owned_by": OWNER })
}

/// GET /api/v1/models
pub(super) async fn list_models(State(state): State<AxumState>) -> Json<Value> {
    Json(json!({ "object": "list", "data": [model_entry(&state.model)] }))
}

/// GET /api/v1/models/{model_id}
pub(super) async fn get_model(Path(model_id): Path<String>) -> Json<Value> {
    Json(model_entry(&model_id))
}
