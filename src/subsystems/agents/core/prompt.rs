//! Layered prompt builder.
//!
//! System prompts are assembled from Markdown fragments under
//! `config/prompts/`.  Layers are appended in order and a missing file is
//! skipped, so every layer is optional.
//!
//! ```text
//! id.md            persona shared by every agent
//! tools.md         tool list; {{tools}} placeholder
//! <agent>.md       role instructions (supervisor.md, search_agent.md, planner.md, …)
//! ```
//!
//! `{{key}}` variables are substituted once, in [`PromptBuilder::build`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SEPARATOR: &str = "\n\n";

pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), parts: Vec::new(), vars: HashMap::new() }
    }

    /// Append `filename` from the prompts directory; skipped when absent.
    pub fn layer(mut self, filename: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    self.parts.push(trimmed.to_string());
                }
            }
            Err(_) => tracing::debug!(path = %path.display(), "prompt layer not found, skipped"),
        }
        self
    }

    /// Render `tools.md` with a comma-separated tool list.  Nothing is
    /// added when `tools` is empty.
    pub fn with_tools(mut self, tools: &[String]) -> Self {
        if tools.is_empty() {
            return self;
        }
        let text = fs::read_to_string(self.prompts_dir.join("tools.md"))
            .unwrap_or_else(|_| "You have access to the following tools: {{tools}}".to_string());
        self.parts.push(text.trim().replace("{{tools}}", &tools.join(", ")));
        self
    }

    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            prompt = prompt.replace(&format!("{{{{{k}}}}}"), v);
        }
        prompt
    }
}

/// Persona plus tool list; append the role layer before building.
pub fn preamble(prompts_dir: impl AsRef<Path>, tools: &[String]) -> PromptBuilder {
    PromptBuilder::new(prompts_dir.as_ref()).layer("id.md").with_tools(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
    }

    #[test]
    fn layers_keep_order() {
        let result = PromptBuilder::new(prompts_dir()).layer("id.md").layer("search_agent.md").build();
        let id_pos = result.find("cus-agent").unwrap();
        let role_pos = result.find("search agent").unwrap();
        assert!(id_pos < role_pos);
    }

    #[test]
    fn missing_layer_is_skipped() {
        let result = PromptBuilder::new(prompts_dir()).layer("nonexistent_file_xyz.md").append("hello").build();
        assert_eq!(result, "hello");
    }

    #[test]
    fn variables_are_substituted() {
        let result = PromptBuilder::new(prompts_dir())
            .append("Content: {{content}}")
            .var("content", "line1\nline2")
            .build();
        assert_eq!(result, "Content: line1\nline2");
    }

    #[test]
    fn tools_rendered_or_omitted() {
        let tools = vec!["calculator".to_string(), "knowledge_base_search".to_string()];
        let with = PromptBuilder::new(prompts_dir()).with_tools(&tools).build();
        assert!(with.contains("calculator, knowledge_base_search"));
        assert!(!with.contains("{{tools}}"));

        let without = PromptBuilder::new(prompts_dir()).with_tools(&[]).build();
        assert!(without.is_empty());
    }

    #[test]
    fn tools_fallback_without_prompt_dir() {
        let result = PromptBuilder::new("/nonexistent").with_tools(&["calculator".to_string()]).build();
        assert_eq!(result, "You have access to the following tools: calculator");
    }

    #[test]
    fn supervisor_prompt_lists_workers() {
        let result = preamble(prompts_dir(), &[])
            .layer("supervisor.md")
            .var("workers", "- search_agent: searches")
            .build();
        assert!(result.contains("- search_agent: searches"));
        assert!(result.contains("next_agent"));
    }
}
