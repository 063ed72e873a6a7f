//! Shared state of one multi-agent task run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::llm::ChatMessage;

use super::types::AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationMode {
    Sequential,
    Parallel,
    Hierarchical,
    Feedback,
}

impl CoordinationMode {
    /// Unknown names fall back to sequential.
    pub fn parse_or_sequential(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sequential" => CoordinationMode::Sequential,
            "parallel" => CoordinationMode::Parallel,
            "hierarchical" => CoordinationMode::Hierarchical,
            "feedback" => CoordinationMode::Feedback,
            other => {
                warn!(mode = %other, "unknown coordination mode, using sequential");
                CoordinationMode::Sequential
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationMode::Sequential => "sequential",
            CoordinationMode::Parallel => "parallel",
            CoordinationMode::Hierarchical => "hierarchical",
            CoordinationMode::Feedback => "feedback",
        }
    }
}

impl fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// One planner subtask.  Unknown `agent_type` values run on the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub description: String,
    #[serde(default = "default_subtask_agent")]
    pub agent_type: String,
}

fn default_subtask_agent() -> String {
    AgentType::Executor.as_str().to_string()
}

impl Subtask {
    pub fn agent_type(&self) -> AgentType {
        self.agent_type.parse().unwrap_or(AgentType::Executor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub agent_id: String,
    pub result: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentState {
    pub messages: Vec<ChatMessage>,
    pub session_id: Option<String>,
    pub task: TaskSpec,
    pub task_type: Option<String>,
    pub task_plan: Vec<Subtask>,
    pub current_subtask: Option<Subtask>,
    pub subtask_index: usize,
    pub current_agent: Option<String>,
    pub current_role: Option<AgentType>,
    pub next_agent: Option<String>,
    pub agent_results: BTreeMap<String, Value>,
    pub agent_history: Vec<HistoryEntry>,
    pub coordination_mode: CoordinationMode,
    pub needs_feedback: bool,
    pub feedback_round: u32,
    pub max_feedback_rounds: u32,
    pub review_result: Option<Value>,
    pub review_passed: bool,
    pub improvement_suggestions: Vec<String>,
    pub intermediate_results: Vec<Value>,
    pub final_result: Option<Value>,
    pub is_finished: bool,
    pub iteration: u32,
    pub max_iterations: u32,
    pub start_time: String,
    pub end_time: Option<String>,
    pub error: Option<String>,
}

impl MultiAgentState {
    pub fn new(
        task: TaskSpec,
        session_id: Option<String>,
        coordination_mode: CoordinationMode,
        max_iterations: u32,
        max_feedback_rounds: u32,
    ) -> Self {
        Self {
            messages: vec![ChatMessage::user(&task.description)],
            session_id,
            task_type: task.task_type.clone(),
            task,
            task_plan: Vec::new(),
            current_subtask: None,
            subtask_index: 0,
            current_agent: None,
            current_role: None,
            next_agent: None,
            agent_results: BTreeMap::new(),
            agent_history: Vec::new(),
            coordination_mode,
            needs_feedback: coordination_mode == CoordinationMode::Feedback,
            feedback_round: 0,
            max_feedback_rounds,
            review_result: None,
            review_passed: false,
            improvement_suggestions: Vec::new(),
            intermediate_results: Vec::new(),
            final_result: None,
            is_finished: false,
            iteration: 0,
            max_iterations,
            start_time: chrono::Utc::now().to_rfc3339(),
            end_time: None,
            error: None,
        }
    }

    /// Copy of this state scoped to one planner subtask.
    pub fn for_subtask(&self, index: usize, subtask: &Subtask) -> Self {
        let mut s = self.clone();
        s.task = TaskSpec { description: subtask.description.clone(), ..self.task.clone() };
        s.current_subtask = Some(subtask.clone());
        s.subtask_index = index;
        s
    }

    pub fn update_agent_result(&mut self, agent_id: &str, result: Value) {
        self.agent_results.insert(agent_id.to_string(), result.clone());
        self.agent_history.push(HistoryEntry {
            agent_id: agent_id.to_string(),
            result: result.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        self.intermediate_results.push(result);
    }

    pub fn mark_finished(&mut self, final_result: Value) {
        if let Some(output) = final_result.get("output").and_then(Value::as_str) {
            self.messages.push(ChatMessage::assistant(output));
        }
        self.is_finished = true;
        self.final_result = Some(final_result);
        self.end_time = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.is_finished = true;
        self.error = Some(error.into());
        self.end_time = Some(chrono::Utc::now().to_rfc3339());
    }

    /// Output text of the latest result from an agent of `role`.
    pub fn output_of(&self, role: AgentType) -> Option<&str> {
        self.agent_history
            .iter()
            .rev()
            .find(|h| h.result.get("agent_type").and_then(Value::as_str) == Some(role.as_str()))
            .and_then(|h| h.result.get("output"))
            .and_then(Value::as_str)
    }

    /// Next role for the step-driven modes; `None` ends the run.
    ///
    /// Sequential walks analyst → planner → executor → reviewer.  Feedback
    /// alternates executor and reviewer until the review passes or the
    /// round budget is spent.  Other modes are driven by the coordinator
    /// directly and always end here.
    pub fn route_next_agent(&self) -> Option<AgentType> {
        if self.is_finished || self.error.is_some() {
            return None;
        }
        if self.iteration >= self.max_iterations {
            warn!(max_iterations = self.max_iterations, "iteration limit reached");
            return None;
        }
        match self.coordination_mode {
            CoordinationMode::Sequential => match self.current_role {
                None => Some(AgentType::Analyst),
                Some(AgentType::Analyst) => Some(AgentType::Planner),
                Some(AgentType::Planner) => Some(AgentType::Executor),
                Some(AgentType::Executor) => Some(AgentType::Reviewer),
                Some(_) => None,
            },
            CoordinationMode::Feedback => match self.current_role {
                None => Some(AgentType::Executor),
                Some(AgentType::Executor) => Some(AgentType::Reviewer),
                Some(AgentType::Reviewer) if self.review_passed => None,
                Some(AgentType::Reviewer) if self.feedback_round >= self.max_feedback_rounds => {
                    warn!(max_rounds = self.max_feedback_rounds, "feedback round limit reached");
                    None
                }
                Some(AgentType::Reviewer) => Some(AgentType::Executor),
                Some(_) => None,
            },
            CoordinationMode::Parallel | CoordinationMode::Hierarchical => None,
        }
    }
}
