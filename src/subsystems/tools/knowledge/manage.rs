//! Knowledge base administration behind `tools/knowledge/*`.
//!
//! Uploaded and pasted text is chunked before it is stored; search returns
//! raw similarity next to the reranked score.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::config::KnowledgeBaseConfig;
use crate::supervisor::bus::BusError;

use super::chunker::{self, CHUNK_CHARS, CHUNK_OVERLAP};
use super::{DocumentMetadata, KnowledgeBase};

/// Extensions accepted by upload, with the `file_type` they are stored as.
pub const SUPPORTED_FORMATS: &[(&str, &str, &str)] = &[
    (".txt", "text", "Plain text"),
    (".md", "markdown", "Markdown"),
    (".markdown", "markdown", "Markdown"),
];

/// Ids returned from an upload are capped at this many.
const MAX_RETURNED_IDS: usize = 10;

#[derive(Debug, Deserialize)]
struct AddText {
    text: String,
    #[serde(default)]
    metadata: DocumentMetadata,
}

#[derive(Debug, Deserialize)]
struct Upload {
    filename: String,
    content: String,
    #[serde(default)]
    metadata: DocumentMetadata,
}

#[derive(Debug, Deserialize)]
struct Search {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

fn parse<T: for<'de> Deserialize<'de>>(method: &str, data: Option<&str>) -> Result<T, BusError> {
    let data = data.ok_or_else(|| BusError::invalid_params(format!("{method} expects a JsonRequest payload")))?;
    serde_json::from_str(data).map_err(|e| BusError::invalid_params(format!("invalid {method} request: {e}")))
}

/// `file_type` for an upload name, if the extension is supported.
pub fn file_type_for(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    SUPPORTED_FORMATS.iter().find(|(e, _, _)| e[1..] == ext).map(|(_, kind, _)| *kind)
}

fn store_chunks(kb: &KnowledgeBase, text: &str, metadata: &DocumentMetadata) -> Result<Vec<String>, BusError> {
    let chunks = chunker::split(text, CHUNK_CHARS, CHUNK_OVERLAP);
    if chunks.is_empty() {
        return Err(BusError::invalid_params("document content must not be empty"));
    }
    chunks
        .iter()
        .map(|c| kb.add_document(c, metadata.clone()).map_err(BusError::internal))
        .collect()
}

/// Handle one `tools/knowledge/*` method.  `data` is the JSON body when
/// the payload was a `JsonRequest`.
pub fn handle(
    kb: &KnowledgeBase,
    config: &KnowledgeBaseConfig,
    method: &str,
    data: Option<&str>,
) -> Result<Value, BusError> {
    match method {
        "tools/knowledge/add" => {
            let mut req: AddText = parse(method, data)?;
            req.metadata.file_type.get_or_insert_with(|| "text".into());
            let ids = store_chunks(kb, &req.text, &req.metadata)?;
            Ok(json!({ "success": true, "document_ids": ids }))
        }
        "tools/knowledge/upload" => {
            let mut req: Upload = parse(method, data)?;
            let Some(kind) = file_type_for(&req.filename) else {
                let formats: Vec<_> = SUPPORTED_FORMATS.iter().map(|(e, _, _)| *e).collect();
                return Err(BusError::invalid_params(format!(
                    "unsupported file format: {}; supported: {}",
                    req.filename,
                    formats.join(", ")
                )));
            };
            req.metadata.file_name.get_or_insert_with(|| req.filename.clone());
            req.metadata.file_type = Some(kind.to_string());
            req.metadata.source.get_or_insert_with(|| "upload".into());
            let ids = store_chunks(kb, &req.content, &req.metadata)?;
            info!(file = %req.filename, chunks = ids.len(), "document uploaded");
            Ok(json!({
                "success": true,
                "message": format!("uploaded {}", req.filename),
                "document_count": 1,
                "chunk_count": ids.len(),
                "document_ids": ids.iter().take(MAX_RETURNED_IDS).collect::<Vec<_>>(),
            }))
        }
        "tools/knowledge/search" => {
            let req: Search = parse(method, data)?;
            let top_k = req.top_k.unwrap_or(config.max_results).max(1);
            let hits = kb.search(&req.query, top_k, config.min_score).map_err(BusError::invalid_params)?;
            let results: Vec<Value> = hits
                .into_iter()
                .map(|h| {
                    json!({
                        "id": h.document.id,
                        "content": h.document.content,
                        "metadata": h.document.metadata,
                        "similarity_score": h.similarity,
                        "score": h.score,
                    })
                })
                .collect();
            Ok(json!({ "total": results.len(), "results": results }))
        }
        "tools/knowledge/stats" => {
            let stats = kb.stats().map_err(BusError::internal)?;
            Ok(json!({ "success": true, "stats": stats }))
        }
        "tools/knowledge/clear" => {
            let cleared = kb.clear().map_err(BusError::internal)?;
            Ok(json!({ "success": true, "cleared": cleared }))
        }
        _ => {
            let descriptions: serde_json::Map<String, Value> =
                SUPPORTED_FORMATS.iter().map(|(e, _, d)| (e.to_string(), json!(d))).collect();
            Ok(json!({
                "formats": SUPPORTED_FORMATS.iter().map(|(e, _, _)| *e).collect::<Vec<_>>(),
                "descriptions": descriptions,
            }))
        }
    }
}
