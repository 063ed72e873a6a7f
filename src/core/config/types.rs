//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs that subsystems consume.
//! Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── API ──────────────────────────────────────────────────────────────────────

/// REST API (axum channel) configuration.
/// Populated from `[api]` in the TOML.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Whether the HTTP API is started at all.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Require `X-API-Key` / bearer auth on every route except `/health`.
    pub api_key_enabled: bool,
    /// Upper bound for a single chat or task request, in seconds.
    pub request_timeout_seconds: u64,
}

impl ApiConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── LLM ──────────────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Default sampling temperature; agents override it per call.
    pub temperature: f32,
    /// Maximum completion tokens per request.
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Token pricing rates (USD per 1 million tokens).
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
    pub cached_input_per_million_usd: f64,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider name: `"openai"` or `"dummy"`.
    pub provider: String,
    pub openai: OpenAiConfig,
}

// ── Agents ───────────────────────────────────────────────────────────────────

/// Agents subsystem configuration (supervisor, workers, coordinator).
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Upper bound on coordinator routing steps per task.
    pub max_iterations: u32,
    /// Default executor/reviewer rounds in feedback mode.
    pub max_feedback_rounds: u32,
    /// Composite score below which the quality agent auto-optimises.
    pub quality_threshold: f64,
    /// Upper bound on LLM ↔ tool round-trips inside one worker call.
    pub max_tool_rounds: usize,
    /// Number of recent messages the supervisor sees when routing.
    pub supervisor_history: usize,
    /// Directory holding the prompt templates.
    pub prompts_dir: PathBuf,
}

// ── Memory ───────────────────────────────────────────────────────────────────

/// Checkpointer configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Oldest checkpoints are dropped once a session holds this many.
    pub max_checkpoints_per_session: usize,
    /// Write sessions to `{work_dir}/memory/sessions/` and reload them on start.
    pub persist: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_checkpoints_per_session: 50, persist: false }
    }
}

// ── Ratings ──────────────────────────────────────────────────────────────────

/// Weights of the five answer-quality dimensions.  Populated from
/// `[ratings.weights]`; missing keys keep their default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingWeights {
    pub accuracy: f64,
    pub relevance: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub usefulness: f64,
}

impl Default for RatingWeights {
    fn default() -> Self {
        Self { accuracy: 0.30, relevance: 0.25, completeness: 0.20, clarity: 0.15, usefulness: 0.10 }
    }
}

impl RatingWeights {
    /// Order: accuracy, relevance, completeness, clarity, usefulness.
    pub fn as_array(&self) -> [f64; 5] {
        [self.accuracy, self.relevance, self.completeness, self.clarity, self.usefulness]
    }

    /// Weights must be non-negative and sum to 1.0 (±0.001).
    pub fn validate(&self) -> Result<(), String> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be non-negative numbers".into());
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 0.001 {
            return Err(format!("weights must sum to 1.0, got {total}"));
        }
        Ok(())
    }

    /// Weighted sum of dimension scores given in [`as_array`](Self::as_array) order.
    pub fn composite(&self, scores: [f64; 5]) -> f64 {
        scores.iter().zip(self.as_array()).map(|(s, w)| s * w).sum()
    }
}

// ── Tools ────────────────────────────────────────────────────────────────────

/// Knowledge base search tuning.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    pub max_results: usize,
    /// Results whose reranked score falls below this are dropped.
    pub min_score: f64,
}

/// Tools subsystem configuration.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Tool names exposed to agents. Empty means every built-in tool.
    pub enabled: Vec<String>,
    pub knowledge_base: KnowledgeBaseConfig,
}

// ── Top-level ────────────────────────────────────────────────────────────────

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Write logs here instead of stderr when set.
    pub log_file: Option<PathBuf>,
    pub api: ApiConfig,
    pub llm: LlmConfig,
    pub agents: AgentsConfig,
    pub memory: MemoryConfig,
    pub tools: ToolsConfig,
    pub rating_weights: RatingWeights,
    /// Provider key from `LLM_API_KEY` env, never from TOML.
    pub llm_api_key: Option<String>,
    /// REST API key from `API_KEY` env, never from TOML.
    pub api_key: Option<String>,
}
