//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `CUS_AGENT_WORK_DIR` and `CUS_AGENT_LOG_LEVEL` env overrides.
//!
//! # Module layout
//!
//! - **types**: Public configuration structs consumed by subsystems
//!   (`Config`, `LlmConfig`, `AgentsConfig`, etc.).
//! - **raw**: Raw TOML deserialization types (`RawConfig`, `RawLlm`, …).
//!   These mirror the file shape and use serde defaults; kept private.
//! - **load**: Loading logic: `merge_toml`, `load_raw_merged`, `load`,
//!   `load_from`, `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{LOG_LEVEL_ENV, WORK_DIR_ENV, expand_home, load, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    /// Safe `Config` for unit tests: dummy LLM, no API keys, no persistence.
    pub fn test_default(work_dir: &std::path::Path) -> Self {
        Self {
            name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            api: ApiConfig {
                enabled: false,
                host: "127.0.0.1".into(),
                port: 0,
                api_key_enabled: false,
                request_timeout_seconds: 5,
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    max_tokens: 256,
                    timeout_seconds: 1,
                    input_per_million_usd: 0.0,
                    output_per_million_usd: 0.0,
                    cached_input_per_million_usd: 0.0,
                },
            },
            agents: AgentsConfig::test_default(),
            memory: MemoryConfig::default(),
            tools: ToolsConfig {
                enabled: vec![],
                knowledge_base: KnowledgeBaseConfig { max_results: 5, min_score: 0.3 },
            },
            rating_weights: RatingWeights::default(),
            llm_api_key: None,
            api_key: None,
        }
    }
}

#[cfg(test)]
impl AgentsConfig {
    pub fn test_default() -> Self {
        Self {
            max_iterations: 10,
            max_feedback_rounds: 3,
            quality_threshold: 70.0,
            max_tool_rounds: 5,
            supervisor_history: 10,
            prompts_dir: std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/prompts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[supervisor]
name = "test-agent"
work_dir = "~/.cus-agent"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.name, "test-agent");
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn empty_file_uses_documented_defaults() {
        let f = write_toml("");
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.api.port, 8000);
        assert_eq!(cfg.api.host, "0.0.0.0");
        assert!(!cfg.api.api_key_enabled);
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "gpt-4-turbo-preview");
        assert_eq!(cfg.llm.openai.max_tokens, 2000);
        assert_eq!(cfg.agents.max_iterations, 10);
        assert_eq!(cfg.agents.max_feedback_rounds, 3);
        assert_eq!(cfg.agents.quality_threshold, 70.0);
        assert_eq!(cfg.agents.supervisor_history, 10);
        assert_eq!(cfg.memory.max_checkpoints_per_session, 50);
        assert_eq!(cfg.tools.knowledge_base.max_results, 5);
    }

    #[test]
    fn parse_agents_and_tools_sections() {
        let toml = r#"
[agents]
max_feedback_rounds = 2
quality_threshold = 80
max_tool_rounds = 3

[tools]
enabled = ["calculator", "knowledge_base_search"]

[tools.knowledge_base]
max_results = 3
min_score = 0.5
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.agents.max_feedback_rounds, 2);
        assert_eq!(cfg.agents.quality_threshold, 80.0);
        assert_eq!(cfg.agents.max_tool_rounds, 3);
        assert_eq!(cfg.tools.enabled, vec!["calculator", "knowledge_base_search"]);
        assert_eq!(cfg.tools.knowledge_base.max_results, 3);
        assert_eq!(cfg.tools.knowledge_base.min_score, 0.5);
    }

    #[test]
    fn rating_weights_section() {
        let f = write_toml("");
        assert_eq!(load_from(f.path(), None, None).unwrap().rating_weights, RatingWeights::default());

        let toml = r#"
[ratings.weights]
accuracy = 0.4
relevance = 0.2
completeness = 0.2
clarity = 0.1
usefulness = 0.1
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.rating_weights.accuracy, 0.4);
        assert!((cfg.rating_weights.composite([100.0; 5]) - 100.0).abs() < 1e-9);

        let f = write_toml("[ratings.weights]\naccuracy = 0.9\n");
        let msg = load_from(f.path(), None, None).unwrap_err().to_string();
        assert!(msg.contains("sum to 1.0"), "{msg}");
    }

    #[test]
    fn api_bind_addr_joins_host_and_port() {
        let toml = r#"
[api]
host = "127.0.0.1"
port = 9100
api_key_enabled = true
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.api.bind_addr(), "127.0.0.1:9100");
        assert!(cfg.api.api_key_enabled);
    }

    #[test]
    fn relative_log_file_lands_in_work_dir() {
        let toml = r#"
[supervisor]
work_dir = "/tmp/cus"
log_file = "logs/agent.log"
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_file, Some(std::path::PathBuf::from("/tmp/cus/logs/agent.log")));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.cus-agent");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".cus-agent"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, std::path::PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(std::path::Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_work_dir_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), None).unwrap();
        assert_eq!(cfg.work_dir, std::path::PathBuf::from("/tmp/test-override"));
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, Some("debug")).unwrap();
        assert_eq!(cfg.log_level, "debug");
    }

    const BASE_TOML: &str = r#"
[supervisor]
name = "base-agent"
work_dir = "~/.cus-agent"
log_level = "info"

[llm]
default = "dummy"

[llm.openai]
model = "gpt-base"
temperature = 0.1
timeout_seconds = 30
"#;

    fn write_named(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn overlay_keeps_base_fields() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[supervisor]
log_level = "debug"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, None, None).unwrap();
        assert_eq!(cfg.name, "base-agent");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.llm.provider, "dummy");
    }

    #[test]
    fn overlay_wins_scalar() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[llm.openai]
model = "gpt-overlay"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, None, None).unwrap();
        assert_eq!(cfg.llm.openai.model, "gpt-overlay");
        assert_eq!(cfg.llm.openai.temperature, 0.1);
    }

    #[test]
    fn missing_base_errors() {
        let dir = TempDir::new().unwrap();
        let overlay = r#"
[meta]
base = "nonexistent.toml"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let msg = load_from(&overlay_path, None, None).unwrap_err().to_string();
        assert!(msg.contains("cannot read"));
    }

    #[test]
    fn cycle_detection() {
        let dir = TempDir::new().unwrap();
        let self_path = dir.path().join("self.toml");
        let content = format!("[meta]\nbase = \"{}\"\n\n{BASE_TOML}", self_path.display());
        std::fs::write(&self_path, content).unwrap();
        let msg = load_from(&self_path, None, None).unwrap_err().to_string();
        assert!(msg.contains("circular"));
    }
}
