//! Knowledge base routes under `/api/v1/knowledge`.  Each one forwards to a
//! `tools/knowledge/*` bus method.

use axum::{
    Json,
    extract::{Multipart, State},
};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::supervisor::bus::BusPayload;

use super::AxumState;
use super::api::{ApiError, query};

fn json_request(body: &Value) -> BusPayload {
    BusPayload::JsonRequest { data: body.to_string() }
}

fn bad_form(e: impl std::fmt::Display) -> ApiError {
    ApiError::Unprocessable(format!("invalid multipart body: {e}"))
}

/// POST /api/v1/knowledge/upload
///
/// Multipart form with a `file` part and an optional `metadata` part
/// holding a JSON object.
pub(super) async fn upload(State(state): State<AxumState>, mut form: Multipart) -> Result<Json<Value>, ApiError> {
    let mut file: Option<(String, String)> = None;
    let mut metadata: Option<Value> = None;

    while let Some(field) = form.next_field().await.map_err(bad_form)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|_| ApiError::Unprocessable(format!("{filename} is not UTF-8 text")))?;
                file = Some((filename, content));
            }
            Some("metadata") => {
                let text = field.text().await.map_err(bad_form)?;
                if !text.trim().is_empty() {
                    let parsed: Value = serde_json::from_str(&text)
                        .map_err(|e| ApiError::Unprocessable(format!("metadata must be a JSON object: {e}")))?;
                    if !parsed.is_object() {
                        return Err(ApiError::Unprocessable("metadata must be a JSON object".into()));
                    }
                    metadata = Some(parsed);
                }
            }
            _ => {}
        }
    }

    let Some((filename, content)) = file else {
        return Err(ApiError::Unprocessable("missing file part".into()));
    };
    if filename.is_empty() {
        return Err(ApiError::Unprocessable("file part has no filename".into()));
    }
    info!(file = %filename, bytes = content.len(), "knowledge upload received");

    let mut body = Map::new();
    body.insert("filename".into(), json!(filename));
    body.insert("content".into(), json!(content));
    if let Some(m) = metadata {
        body.insert("metadata".into(), m);
    }
    query(&state.comms, "knowledge upload", "tools/knowledge/upload", json_request(&Value::Object(body))).await
}

/// POST /api/v1/knowledge/add-text
pub(super) async fn add_text(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let has_text = body["text"].as_str().is_some_and(|t| !t.trim().is_empty());
    if !has_text {
        return Err(ApiError::Unprocessable("text must be a non-empty string".into()));
    }
    query(&state.comms, "knowledge add", "tools/knowledge/add", json_request(&body)).await
}

/// POST /api/v1/knowledge/search
pub(super) async fn search(State(state): State<AxumState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let has_query = body["query"].as_str().is_some_and(|q| !q.trim().is_empty());
    if !has_query {
        return Err(ApiError::Unprocessable("query must be a non-empty string".into()));
    }
    query(&state.comms, "knowledge search", "tools/knowledge/search", json_request(&body)).await
}

/// GET /api/v1/knowledge/stats
pub(super) async fn stats(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "knowledge stats", "tools/knowledge/stats", BusPayload::Empty).await
}

/// DELETE /api/v1/knowledge/clear
pub(super) async fn clear(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "knowledge clear", "tools/knowledge/clear", BusPayload::Empty).await
}

/// GET /api/v1/knowledge/supported-formats
pub(super) async fn formats(State(state): State<AxumState>) -> Result<Json<Value>, ApiError> {
    query(&state.comms, "knowledge formats", "tools/knowledge/formats", BusPayload::Empty).await
}
