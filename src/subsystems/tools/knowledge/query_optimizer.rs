//! Query optimisation for knowledge base search.
//!
//! Cleans the raw query, extracts keywords (Chinese and English stop words
//! removed), expands a fixed table of technical synonyms and derives several
//! query variants to improve recall.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static TRAILING_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?!.;:,]+$").expect("valid regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w\x{4e00}-\x{9fff}]+").expect("valid regex"));

const CHINESE_STOPWORDS: &[&str] = &[
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也", "很", "到",
    "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "那", "里", "就是", "什么",
    "怎么", "如何", "吗", "呢", "啊", "哦",
];

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "can", "could", "may", "might", "must", "shall", "in",
    "on", "at", "to", "for", "of", "with", "by", "from", "as", "into", "through", "during", "before",
    "after", "above", "below", "between", "under", "again", "further", "then", "once", "here",
    "there", "when", "where", "why", "how", "all", "both", "each", "few", "more", "most", "other",
    "some", "such", "only", "own", "same", "so", "than", "too", "very", "just", "but", "or", "and",
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("api", &["接口", "API", "interface"]),
    ("接口", &["api", "API", "interface"]),
    ("配置", &["设置", "配置项", "config", "configuration", "参数"]),
    ("设置", &["配置", "配置项", "config", "configuration"]),
    ("方法", &["函数", "method", "function", "功能"]),
    ("函数", &["方法", "method", "function"]),
    ("错误", &["异常", "error", "exception", "问题", "bug"]),
    ("异常", &["错误", "error", "exception"]),
    ("安装", &["部署", "install", "deploy", "配置"]),
    ("部署", &["安装", "install", "deploy"]),
    ("文档", &["资料", "document", "doc", "手册", "manual"]),
    ("手册", &["文档", "document", "manual", "指南"]),
    ("指南", &["教程", "guide", "tutorial", "手册"]),
    ("教程", &["指南", "guide", "tutorial"]),
    ("数据库", &["db", "database", "数据存储"]),
    ("服务器", &["server", "服务端", "backend"]),
    ("客户端", &["client", "前端", "frontend"]),
];

/// Result of [`QueryOptimizer::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedQuery {
    pub original_query: String,
    pub cleaned_query: String,
    pub keywords: Vec<String>,
    pub expanded_terms: Vec<String>,
    pub optimized_query: String,
}

#[derive(Debug, Clone)]
pub struct QueryOptimizer {
    stopwords: HashSet<&'static str>,
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self { stopwords: CHINESE_STOPWORDS.iter().chain(ENGLISH_STOPWORDS).copied().collect() }
    }
}

impl QueryOptimizer {
    pub fn optimize(&self, query: &str, expand_synonyms: bool) -> OptimizedQuery {
        let cleaned = clean_query(query);
        let keywords = self.extract_keywords(&cleaned);
        let expanded_terms = if expand_synonyms { expand(&keywords) } else { Vec::new() };

        // Keep the cleaned query's wording and append a few expansions.
        let optimized_query = if !keywords.is_empty() && !expanded_terms.is_empty() {
            let top: Vec<&str> = expanded_terms.iter().take(3).map(String::as_str).collect();
            format!("{cleaned} {}", top.join(" "))
        } else {
            cleaned.clone()
        };

        debug!(?keywords, ?expanded_terms, %optimized_query, "query optimised");
        OptimizedQuery {
            original_query: query.to_string(),
            cleaned_query: cleaned,
            keywords,
            expanded_terms,
            optimized_query,
        }
    }

    /// Stop-word-free keywords in first-seen order, deduplicated case-insensitively.
    pub fn extract_keywords(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        WORD.find_iter(query)
            .map(|m| m.as_str())
            .filter(|w| {
                let lower = w.to_lowercase();
                !self.stopwords.contains(lower.as_str())
                    && (w.chars().count() > 1 || w.chars().all(char::is_alphabetic))
            })
            .filter(|w| seen.insert(w.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    /// Original, optimised, keywords-only and keywords-plus-two-expansions,
    /// deduplicated case-insensitively.
    pub fn generate_multi_queries(&self, query: &str) -> Vec<String> {
        let opt = self.optimize(query, true);
        let mut candidates = vec![query.to_string(), opt.optimized_query.clone()];
        if !opt.keywords.is_empty() {
            candidates.push(opt.keywords.join(" "));
            if !opt.expanded_terms.is_empty() {
                let terms: Vec<&str> = opt
                    .keywords
                    .iter()
                    .chain(opt.expanded_terms.iter().take(2))
                    .map(String::as_str)
                    .collect();
                candidates.push(terms.join(" "));
            }
        }

        let mut seen = HashSet::new();
        candidates.into_iter().filter(|q| seen.insert(q.to_lowercase())).collect()
    }
}

/// Collapse whitespace, map full-width punctuation to ASCII and drop
/// trailing punctuation.
pub fn clean_query(query: &str) -> String {
    let collapsed = WHITESPACE.replace_all(query.trim(), " ");
    let normalised: String = collapsed
        .chars()
        .map(|c| match c {
            '？' => '?',
            '！' => '!',
            '，' => ',',
            '。' => '.',
            '；' => ';',
            '：' => ':',
            other => other,
        })
        .collect();
    TRAILING_PUNCT.replace(&normalised, "").into_owned()
}

fn expand(keywords: &[String]) -> Vec<String> {
    let present: HashSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let mut expanded: Vec<String> = Vec::new();
    for keyword in keywords {
        let lower = keyword.to_lowercase();
        let Some((_, synonyms)) = SYNONYMS.iter().find(|(k, _)| *k == lower) else {
            continue;
        };
        for syn in *synonyms {
            if !present.contains(&syn.to_lowercase()) && !expanded.iter().any(|e| e == syn) {
                expanded.push(syn.to_string());
            }
        }
    }
    expanded
}
