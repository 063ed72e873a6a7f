//! Role agent vocabulary: types, statuses, capabilities, metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Coordinator,
    Analyst,
    Planner,
    Executor,
    Reviewer,
    Researcher,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Coordinator => "coordinator",
            AgentType::Analyst => "analyst",
            AgentType::Planner => "planner",
            AgentType::Executor => "executor",
            AgentType::Reviewer => "reviewer",
            AgentType::Researcher => "researcher",
        }
    }

    pub fn prompt_file(&self) -> String {
        format!("{}.md", self.as_str())
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Ok(AgentType::Coordinator),
            "analyst" => Ok(AgentType::Analyst),
            "planner" => Ok(AgentType::Planner),
            "executor" => Ok(AgentType::Executor),
            "reviewer" => Ok(AgentType::Reviewer),
            "researcher" => Ok(AgentType::Researcher),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// 0.0 to 1.0.
    pub confidence: f64,
}

impl AgentCapability {
    pub fn new(name: &str, description: &str, confidence: f64) -> Self {
        Self { name: name.into(), description: description.into(), required_tools: Vec::new(), confidence }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: Vec<AgentCapability>,
    pub status: AgentStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// One `execute` call as kept in an agent's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task: serde_json::Value,
    pub timestamp: String,
    /// `started`, `completed` or `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Display name, description and capabilities of the built-in roles.
pub fn role_profile(agent_type: AgentType) -> (&'static str, &'static str, Vec<AgentCapability>) {
    match agent_type {
        AgentType::Coordinator => (
            "Coordinator",
            "Distributes work between agents and aggregates their results",
            vec![AgentCapability::new("coordination", "Schedule agents and merge results", 0.9)],
        ),
        AgentType::Analyst => (
            "Analyst",
            "Analyses the task: goals, requirements, constraints and risks",
            vec![
                AgentCapability::new("requirement_analysis", "Identify goals and requirements", 0.9),
                AgentCapability::new("risk_analysis", "Spot constraints and risks", 0.8),
            ],
        ),
        AgentType::Planner => (
            "Planner",
            "Breaks the task into ordered subtasks",
            vec![
                AgentCapability::new("task_decomposition", "Split complex tasks into executable subtasks", 0.9),
                AgentCapability::new("strategy_planning", "Choose an execution strategy", 0.85),
                AgentCapability::new("resource_allocation", "Assign subtasks to agent types", 0.8),
            ],
        ),
        AgentType::Executor => (
            "Executor",
            "Carries out the task and produces the deliverable",
            vec![
                AgentCapability::new("task_execution", "Produce the final deliverable", 0.9),
                AgentCapability::new("tool_usage", "Apply tools and concrete steps", 0.8),
            ],
        ),
        AgentType::Reviewer => (
            "Reviewer",
            "Reviews results for correctness and completeness",
            vec![
                AgentCapability::new("quality_review", "Judge correctness and completeness", 0.9),
                AgentCapability::new("improvement_suggestions", "Suggest concrete fixes", 0.85),
            ],
        ),
        AgentType::Researcher => (
            "Researcher",
            "Gathers background facts and options",
            vec![
                AgentCapability::new("information_gathering", "Collect relevant facts", 0.85),
                AgentCapability::new("fact_checking", "Separate facts from assumptions", 0.8),
            ],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_parses_case_insensitively() {
        assert_eq!("Planner".parse::<AgentType>(), Ok(AgentType::Planner));
        assert!("wizard".parse::<AgentType>().is_err());
        assert_eq!(serde_json::to_string(&AgentType::Researcher).unwrap(), "\"researcher\"");
    }

    #[test]
    fn every_role_has_capabilities() {
        for t in [AgentType::Analyst, AgentType::Planner, AgentType::Executor, AgentType::Reviewer, AgentType::Researcher] {
            let (_, _, caps) = role_profile(t);
            assert!(!caps.is_empty());
            assert!(caps.iter().all(|c| (0.0..=1.0).contains(&c.confidence)));
        }
    }
}
