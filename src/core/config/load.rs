//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `CUS_AGENT_WORK_DIR` and `CUS_AGENT_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

pub const WORK_DIR_ENV: &str = "CUS_AGENT_WORK_DIR";
pub const LOG_LEVEL_ENV: &str = "CUS_AGENT_LOG_LEVEL";

/// Deep-merge two TOML values.
/// Tables merge key by key; any other overlay value replaces the base value.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file and follow its `[meta] base` chain.
/// `visited` holds canonical paths already seen so cycles fail fast.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay: toml::Value = toml::from_str(&text)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let base = overlay
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
        .map(|b| {
            if Path::new(b).is_absolute() {
                PathBuf::from(b)
            } else {
                path.parent().unwrap_or(Path::new(".")).join(b)
            }
        });

    match base {
        Some(base_path) => {
            let base_val = load_raw_merged(&base_path, visited)?;
            Ok(merge_toml(base_val, overlay))
        }
        None => Ok(overlay),
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env overrides.
/// Without a path and without `config/default.toml`, built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var(WORK_DIR_ENV).ok();
    let log_level_override = env::var(LOG_LEVEL_ENV).ok();

    let path = match config_path {
        Some(p) => Some(PathBuf::from(p)),
        None => Some(PathBuf::from("config/default.toml")).filter(|p| p.exists()),
    };

    match path {
        Some(p) => load_from(&p, work_dir_override.as_deref(), log_level_override.as_deref()),
        None => Ok(resolve(
            RawConfig::default(),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )),
    }
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    let config = resolve(parsed, work_dir_override, log_level_override);
    config
        .rating_weights
        .validate()
        .map_err(|e| AppError::Config(format!("[ratings.weights] in {}: {e}", path.display())))?;
    Ok(config)
}

fn resolve(raw: RawConfig, work_dir_override: Option<&str>, log_level_override: Option<&str>) -> Config {
    let s = raw.supervisor;
    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();
    let log_file = s.log_file.map(|f| {
        let p = expand_home(&f);
        if p.is_absolute() { p } else { work_dir.join(p) }
    });

    Config {
        name: s.name,
        work_dir,
        log_level,
        log_file,
        api: ApiConfig {
            enabled: raw.api.enabled,
            host: raw.api.host,
            port: raw.api.port,
            api_key_enabled: raw.api.api_key_enabled,
            request_timeout_seconds: raw.api.request_timeout_seconds.max(1),
        },
        llm: LlmConfig {
            provider: raw.llm.provider,
            openai: OpenAiConfig {
                api_base_url: raw.llm.openai.api_base_url,
                model: raw.llm.openai.model,
                temperature: raw.llm.openai.temperature,
                max_tokens: raw.llm.openai.max_tokens,
                timeout_seconds: raw.llm.openai.timeout_seconds,
                input_per_million_usd: raw.llm.openai.input_per_million_usd,
                output_per_million_usd: raw.llm.openai.output_per_million_usd,
                cached_input_per_million_usd: raw.llm.openai.cached_input_per_million_usd,
            },
        },
        agents: AgentsConfig {
            max_iterations: raw.agents.max_iterations.max(1),
            max_feedback_rounds: raw.agents.max_feedback_rounds,
            quality_threshold: raw.agents.quality_threshold.clamp(0.0, 100.0),
            max_tool_rounds: raw.agents.max_tool_rounds,
            supervisor_history: raw.agents.supervisor_history.max(1),
            prompts_dir: expand_home(&raw.agents.prompts_dir),
        },
        memory: MemoryConfig {
            max_checkpoints_per_session: raw.memory.max_checkpoints_per_session.max(1),
            persist: raw.memory.persist,
        },
        tools: ToolsConfig {
            enabled: raw.tools.enabled,
            knowledge_base: KnowledgeBaseConfig {
                max_results: raw.tools.knowledge_base.max_results.max(1),
                min_score: raw.tools.knowledge_base.min_score,
            },
        },
        rating_weights: raw.ratings.weights,
        llm_api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
        api_key: env::var("API_KEY").ok().filter(|k| !k.is_empty()),
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
