//! Conversation state saved to the checkpointer after every turn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub session_id: String,
    /// Last routing target (`search_agent`, `respond`, …).
    #[serde(default)]
    pub next_agent: Option<String>,
    #[serde(default)]
    pub task_instruction: Option<String>,
    /// Latest reply per worker id.
    #[serde(default)]
    pub agent_outputs: BTreeMap<String, String>,
    /// Supervisor steps taken for the current request.
    #[serde(default)]
    pub iteration: u32,
    pub max_iterations: u32,
}

impl ChatState {
    pub fn new(session_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            messages: Vec::new(),
            session_id: session_id.into(),
            next_agent: None,
            task_instruction: None,
            agent_outputs: BTreeMap::new(),
            iteration: 0,
            max_iterations,
        }
    }

    /// Restore a checkpointed state.  A state that no longer deserialises
    /// is treated as absent.
    pub fn restore(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "checkpointed chat state unreadable, starting fresh");
                None
            }
        }
    }

    /// Start a new request: per-request counters reset, history kept.
    pub fn begin_turn(&mut self, user_message: &str) {
        self.iteration = 0;
        self.next_agent = None;
        self.task_instruction = None;
        self.messages.push(ChatMessage::user(user_message));
    }

    pub fn last_assistant(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant" && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }

    /// The last `n` user/assistant messages with content.
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        conversation_tail(&self.messages, n)
    }
}

/// Last `n` user/assistant messages that carry text.  System prompts, tool
/// results and tool-call stubs are left out.
pub fn conversation_tail(messages: &[ChatMessage], n: usize) -> Vec<ChatMessage> {
    let kept: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| (m.role == "user" || m.role == "assistant") && m.tool_calls.is_empty())
        .filter(|m| !m.content.trim().is_empty())
        .collect();
    let skip = kept.len().saturating_sub(n);
    kept.into_iter().skip(skip).cloned().collect()
}
