//! Pull JSON objects out of free-form model output.
//!
//! Models wrap JSON in Markdown fences or surround it with prose.  Routing
//! decisions prefer the first fenced block; scoring replies take the widest
//! `{ … }` span.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

static OBJECT_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Body of the first ```` ```json ```` block, or the trimmed text.
pub fn fenced_or_raw(text: &str) -> &str {
    FENCED_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or_else(|| text.trim(), |m| m.as_str())
}

/// Greedy first-`{` to last-`}` span.
pub fn object_span(text: &str) -> Option<&str> {
    OBJECT_SPAN.find(text).map(|m| m.as_str())
}

/// Parse the fenced block (or raw text) first, then fall back to the
/// object span.
pub fn parse_loose<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    match serde_json::from_str(fenced_or_raw(text)) {
        Ok(v) => Ok(v),
        Err(first) => match object_span(text) {
            Some(span) => serde_json::from_str(span).map_err(|e| e.to_string()),
            None => Err(first.to_string()),
        },
    }
}
