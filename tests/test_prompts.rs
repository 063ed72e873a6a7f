//! Prompt files under config/prompts and the shipped default config.

use std::fs;
use std::path::{Path, PathBuf};

fn prompts_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
}

fn prompt(name: &str) -> String {
    let path = prompts_dir().join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("{} unreadable: {e}", path.display()))
}

#[test]
fn every_worker_has_a_prompt() {
    for name in ["search_agent", "analysis_agent", "write_agent", "execution_agent", "quality_agent"] {
        assert!(!prompt(&format!("{name}.md")).trim().is_empty(), "{name}.md is empty");
    }
}

#[test]
fn every_role_has_a_prompt() {
    for name in ["analyst", "planner", "researcher", "executor", "reviewer"] {
        assert!(!prompt(&format!("{name}.md")).trim().is_empty(), "{name}.md is empty");
    }
}

#[test]
fn supervisor_prompt_lists_workers() {
    assert!(prompt("supervisor.md").contains("{{workers}}"));
}

#[test]
fn quality_prompt_template_vars() {
    let evaluate = prompt("quality_evaluate.md");
    assert!(evaluate.contains("{{content}}"));
    assert!(evaluate.contains("{{criteria}}"));
    let optimize = prompt("quality_optimize.md");
    assert!(optimize.contains("{{content}}"));
    assert!(optimize.contains("{{feedback}}"));
}

#[test]
fn tools_prompt_template_var() {
    assert!(prompt("tools.md").contains("{{tools}}"));
}

#[test]
fn default_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = cus_agent::config::load_from(&path, Some("/tmp/cus-agent-test"), None).unwrap();
    assert_eq!(config.api.port, 8000);
    assert_eq!(config.llm.provider, "openai");
    assert_eq!(config.agents.max_feedback_rounds, 3);
    assert_eq!(config.memory.max_checkpoints_per_session, 50);
    assert_eq!(config.work_dir, PathBuf::from("/tmp/cus-agent-test"));
}

#[test]
fn decision_prompt_template_var() {
    assert!(!prompt("decision.md").trim().is_empty());
    assert!(prompt("decision_analyze.md").contains("{{query}}"));
}

#[test]
fn recommendation_prompt_template_vars() {
    assert!(!prompt("recommend.md").trim().is_empty());
    let context = prompt("recommend_context.md");
    assert!(context.contains("{{message}}"));
    assert!(context.contains("{{history}}"));
    let candidates = prompt("recommend_candidates.md");
    for var in ["{{count}}", "{{message}}", "{{topic}}", "{{intent}}", "{{keywords}}"] {
        assert!(candidates.contains(var), "recommend_candidates.md lacks {var}");
    }
}

#[test]
fn default_config_carries_rating_weights() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = cus_agent::config::load_from(&path, Some("/tmp/cus-agent-test"), None).unwrap();
    assert_eq!(config.rating_weights, cus_agent::config::RatingWeights::default());
}
