//! Multi-signal reranking of knowledge base hits.
//!
//! Each candidate is scored on six dimensions in `[0, 1]` and combined with
//! fixed weights; the list is then sorted by the combined score.

use serde::Serialize;
use tracing::{debug, info};

use super::Document;

const W_VECTOR: f64 = 0.30;
const W_KEYWORD: f64 = 0.25;
const W_EXACT: f64 = 0.20;
const W_LENGTH: f64 = 0.10;
const W_METADATA: f64 = 0.05;
const W_POSITION: f64 = 0.10;

/// Window, in characters, inspected by the position signal.
const PREFIX_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub vector_similarity: f64,
    pub keyword_match: f64,
    pub exact_match: f64,
    pub content_length: f64,
    pub metadata_quality: f64,
    pub position: f64,
}

impl ScoreBreakdown {
    pub fn combined(&self) -> f64 {
        self.vector_similarity * W_VECTOR
            + self.keyword_match * W_KEYWORD
            + self.exact_match * W_EXACT
            + self.content_length * W_LENGTH
            + self.metadata_quality * W_METADATA
            + self.position * W_POSITION
    }
}

/// A reranked hit.  `similarity` is the retrieval score it came in with.
#[derive(Debug, Clone, Serialize)]
pub struct RankedDocument {
    pub document: Document,
    pub similarity: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultReranker;

impl ResultReranker {
    /// Score and sort `results` (document, similarity) best first.
    pub fn rerank(&self, results: Vec<(Document, f64)>, query: &str, keywords: &[String]) -> Vec<RankedDocument> {
        let query = query.to_lowercase();
        let mut ranked: Vec<RankedDocument> = results
            .into_iter()
            .map(|(document, similarity)| {
                let breakdown = score(&document, similarity, &query, keywords);
                RankedDocument { score: breakdown.combined(), document, similarity, breakdown }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if let Some(top) = ranked.first() {
            info!(candidates = ranked.len(), top_id = %top.document.id, top_score = top.score, "reranked results");
        }
        ranked
    }

    /// Drop hits whose combined score is below `min_score`.
    pub fn filter_low_quality(&self, ranked: Vec<RankedDocument>, min_score: f64) -> Vec<RankedDocument> {
        let before = ranked.len();
        let kept: Vec<_> = ranked.into_iter().filter(|r| r.score >= min_score).collect();
        if kept.len() < before {
            debug!(removed = before - kept.len(), min_score, "filtered low quality results");
        }
        kept
    }
}

fn score(doc: &Document, similarity: f64, query: &str, keywords: &[String]) -> ScoreBreakdown {
    let content = doc.content.to_lowercase();
    ScoreBreakdown {
        vector_similarity: similarity.clamp(0.0, 1.0),
        keyword_match: keyword_match(&content, keywords),
        exact_match: exact_match(&content, query),
        content_length: content_length(&content),
        metadata_quality: metadata_quality(doc),
        position: position(&content, query, keywords),
    }
}

fn keyword_match(content: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.5;
    }
    let matched = keywords.iter().filter(|k| content.contains(&k.to_lowercase())).count();
    let rate = matched as f64 / keywords.len() as f64;
    if rate >= 0.8 { (rate + 0.1).min(1.0) } else { rate }
}

/// 1.0 for the whole query; otherwise credit the longest run of at least
/// two consecutive query words found in the content.
fn exact_match(content: &str, query: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    if content.contains(query) {
        return 1.0;
    }
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() <= 1 {
        return 0.0;
    }
    let mut longest = 0;
    for i in 0..words.len() {
        for j in (i + 2)..=words.len() {
            if j - i > longest && content.contains(&words[i..j].join(" ")) {
                longest = j - i;
            }
        }
    }
    if longest > 0 { 0.5 + 0.5 * longest as f64 / words.len() as f64 } else { 0.0 }
}

fn content_length(content: &str) -> f64 {
    let len = content.chars().count() as f64;
    if (200.0..=2000.0).contains(&len) {
        1.0
    } else if len < 200.0 {
        0.5 + len / 400.0
    } else {
        (1.0 - (len - 2000.0) / 10000.0).max(0.3)
    }
}

fn metadata_quality(doc: &Document) -> f64 {
    let m = &doc.metadata;
    let mut score = 0.5;
    if m.file_name.is_some() {
        score += 0.2;
    }
    for present in [m.source.is_some(), m.file_type.is_some(), m.upload_time.is_some()] {
        if present {
            score += 0.1;
        }
    }
    f64::min(score, 1.0)
}

fn position(content: &str, query: &str, keywords: &[String]) -> f64 {
    let prefix: String = content.chars().take(PREFIX_CHARS).collect();
    let mut score = 0.5;
    if !query.is_empty() && prefix.contains(query) {
        score += 0.3;
    }
    if !keywords.is_empty() {
        let early = keywords.iter().filter(|k| prefix.contains(&k.to_lowercase())).count();
        score += 0.2 * early as f64 / keywords.len() as f64;
    }
    f64::min(score, 1.0)
}
