//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

use super::types::RatingWeights;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape: serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub supervisor: RawSupervisor,
    #[serde(default)]
    pub api: RawApi,
    #[serde(default)]
    pub llm: RawLlm,
    #[serde(default)]
    pub agents: RawAgents,
    #[serde(default)]
    pub memory: RawMemory,
    #[serde(default)]
    pub tools: RawTools,
    #[serde(default)]
    pub ratings: RawRatings,
}

#[derive(Deserialize)]
pub(super) struct RawSupervisor {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for RawSupervisor {
    fn default() -> Self {
        Self {
            name: default_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

// ── API ──────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawApi {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key_enabled: bool,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for RawApi {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            api_key_enabled: false,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
pub(super) struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_openai_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_openai_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub input_per_million_usd: f64,
    #[serde(default)]
    pub output_per_million_usd: f64,
    #[serde(default)]
    pub cached_input_per_million_usd: f64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            max_tokens: default_openai_max_tokens(),
            timeout_seconds: default_openai_timeout_seconds(),
            input_per_million_usd: 0.0,
            output_per_million_usd: 0.0,
            cached_input_per_million_usd: 0.0,
        }
    }
}

// ── Agents ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawAgents {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_feedback_rounds")]
    pub max_feedback_rounds: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_supervisor_history")]
    pub supervisor_history: usize,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_feedback_rounds: default_max_feedback_rounds(),
            quality_threshold: default_quality_threshold(),
            max_tool_rounds: default_max_tool_rounds(),
            supervisor_history: default_supervisor_history(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

// ── Memory ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawMemory {
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints_per_session: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self { max_checkpoints_per_session: default_max_checkpoints(), persist: true }
    }
}

// ── Tools ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawTools {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub knowledge_base: RawKnowledgeBase,
}

#[derive(Deserialize)]
pub(super) struct RawKnowledgeBase {
    #[serde(default = "default_kb_max_results")]
    pub max_results: usize,
    #[serde(default = "default_kb_min_score")]
    pub min_score: f64,
}

impl Default for RawKnowledgeBase {
    fn default() -> Self {
        Self { max_results: default_kb_max_results(), min_score: default_kb_min_score() }
    }
}

// ── Ratings ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawRatings {
    #[serde(default)]
    pub weights: RatingWeights,
}

// ── Defaults ────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

pub(super) fn default_name() -> String {
    "cus-agent".to_string()
}

pub(super) fn default_work_dir() -> String {
    "~/.cus-agent".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

pub(super) fn default_api_port() -> u16 {
    8000
}

pub(super) fn default_request_timeout_seconds() -> u64 {
    120
}

pub(super) fn default_llm_provider() -> String {
    "openai".to_string()
}

pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

pub(super) fn default_openai_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

pub(super) fn default_openai_temperature() -> f32 {
    0.7
}

pub(super) fn default_openai_max_tokens() -> u32 {
    2000
}

pub(super) fn default_openai_timeout_seconds() -> u64 {
    60
}

pub(super) fn default_max_iterations() -> u32 {
    10
}

pub(super) fn default_max_feedback_rounds() -> u32 {
    3
}

pub(super) fn default_quality_threshold() -> f64 {
    70.0
}

pub(super) fn default_max_tool_rounds() -> usize {
    5
}

pub(super) fn default_supervisor_history() -> usize {
    10
}

pub(super) fn default_prompts_dir() -> String {
    "config/prompts".to_string()
}

pub(super) fn default_max_checkpoints() -> usize {
    50
}

pub(super) fn default_kb_max_results() -> usize {
    5
}

pub(super) fn default_kb_min_score() -> f64 {
    0.3
}
