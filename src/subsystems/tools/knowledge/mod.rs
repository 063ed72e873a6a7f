//! In-process knowledge base behind the `knowledge_base_*` tools.
//!
//! Documents live in memory.  Search runs every query variant from the
//! [`QueryOptimizer`] against every document with a lexical cosine
//! similarity, keeps the best similarity per document, then reranks and
//! filters with the [`ResultReranker`].

pub mod chunker;
pub mod manage;
pub mod query_optimizer;
pub mod reranker;

use std::collections::{BTreeMap, HashMap};
use std::sync::{LazyLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use query_optimizer::QueryOptimizer;
use reranker::{RankedDocument, ResultReranker};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w\x{4e00}-\x{9fff}]+").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Listing entry for `knowledge_base_list`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub total_documents: usize,
    pub total_chars: usize,
    pub by_file_type: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct KnowledgeBase {
    docs: RwLock<BTreeMap<String, Document>>,
    optimizer: QueryOptimizer,
    reranker: ResultReranker,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document and return its new id.
    pub fn add(&self, content: &str, title: Option<String>, source: Option<String>) -> Result<String, String> {
        self.add_document(
            content,
            DocumentMetadata { file_name: title, source, file_type: Some("text".into()), upload_time: None },
        )
    }

    /// Store a document with caller metadata.  `upload_time` is stamped
    /// when missing.
    pub fn add_document(&self, content: &str, mut metadata: DocumentMetadata) -> Result<String, String> {
        let content = content.trim();
        if content.is_empty() {
            return Err("document content must not be empty".into());
        }
        metadata.upload_time.get_or_insert_with(|| chrono::Utc::now().to_rfc3339());
        let id = uuid::Uuid::now_v7().to_string();
        let doc = Document { id: id.clone(), content: content.to_string(), metadata };
        self.docs
            .write()
            .map_err(|_| "knowledge base lock poisoned".to_string())?
            .insert(id.clone(), doc);
        info!(doc_id = %id, chars = content.chars().count(), "knowledge base document added");
        Ok(id)
    }

    /// Remove every document; returns how many there were.
    pub fn clear(&self) -> Result<usize, String> {
        let mut docs = self.docs.write().map_err(|_| "knowledge base lock poisoned".to_string())?;
        let n = docs.len();
        docs.clear();
        info!(removed = n, "knowledge base cleared");
        Ok(n)
    }

    pub fn stats(&self) -> Result<KnowledgeStats, String> {
        let docs = self.docs.read().map_err(|_| "knowledge base lock poisoned".to_string())?;
        let mut by_file_type = BTreeMap::new();
        for d in docs.values() {
            let kind = d.metadata.file_type.clone().unwrap_or_else(|| "unknown".into());
            *by_file_type.entry(kind).or_insert(0) += 1;
        }
        Ok(KnowledgeStats {
            total_documents: docs.len(),
            total_chars: docs.values().map(|d| d.content.chars().count()).sum(),
            by_file_type,
        })
    }

    /// `Ok(false)` when no document has that id.
    pub fn delete(&self, id: &str) -> Result<bool, String> {
        let removed = self
            .docs
            .write()
            .map_err(|_| "knowledge base lock poisoned".to_string())?
            .remove(id)
            .is_some();
        if removed {
            info!(doc_id = %id, "knowledge base document deleted");
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<DocumentSummary>, String> {
        let docs = self.docs.read().map_err(|_| "knowledge base lock poisoned".to_string())?;
        Ok(docs
            .values()
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                title: d.metadata.file_name.clone(),
                chars: d.content.chars().count(),
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn search(&self, query: &str, max_results: usize, min_score: f64) -> Result<Vec<RankedDocument>, String> {
        let query = query.trim();
        if query.is_empty() {
            return Err("query must not be empty".into());
        }
        let variants = self.optimizer.generate_multi_queries(query);
        let keywords = self.optimizer.optimize(query, true).keywords;
        let variant_vectors: Vec<_> = variants.iter().map(|v| term_frequencies(v)).collect();

        let candidates: Vec<(Document, f64)> = {
            let docs = self.docs.read().map_err(|_| "knowledge base lock poisoned".to_string())?;
            docs.values()
                .filter_map(|doc| {
                    let mut text = doc.content.clone();
                    if let Some(title) = &doc.metadata.file_name {
                        text.push(' ');
                        text.push_str(title);
                    }
                    let doc_vec = term_frequencies(&text);
                    let best = variant_vectors.iter().map(|q| cosine(q, &doc_vec)).fold(0.0, f64::max);
                    (best > 0.0).then(|| (doc.clone(), best))
                })
                .collect()
        };
        debug!(variants = variants.len(), candidates = candidates.len(), "knowledge base candidates");

        let ranked = self.reranker.rerank(candidates, query, &keywords);
        let mut kept = self.reranker.filter_low_quality(ranked, min_score);
        kept.truncate(max_results);
        Ok(kept)
    }
}

/// Lowercased term counts.  CJK runs are split into single characters so
/// unsegmented Chinese text still overlaps.
fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for m in TOKEN.find_iter(&text.to_lowercase()) {
        let mut run = String::new();
        for c in m.as_str().chars() {
            if ('\u{4e00}'..='\u{9fff}').contains(&c) {
                if !run.is_empty() {
                    *tf.entry(std::mem::take(&mut run)).or_default() += 1.0;
                }
                *tf.entry(c.to_string()).or_default() += 1.0;
            } else {
                run.push(c);
            }
        }
        if !run.is_empty() {
            *tf.entry(run).or_default() += 1.0;
        }
    }
    tf
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a.iter().filter_map(|(k, x)| b.get(k).map(|y| x * y)).sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm = |v: &HashMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();
    dot / (norm(a) * norm(b))
}
