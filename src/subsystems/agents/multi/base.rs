//! Role agent: one LLM persona (analyst, planner, …) with status and history.
//!
//! [`RoleAgent::execute`] never fails outward.  A failed run is returned as
//! `{agent_id, agent_type, error, success: false}` and leaves the agent in
//! the `error` status.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::json::parse_loose;
use crate::subsystems::agents::core::prompt;

use super::state::{MultiAgentState, Subtask};
use super::types::{AgentCapability, AgentMetadata, AgentStatus, AgentType, ExecutionRecord, role_profile};

const AGENT_VERSION: &str = "1.0.0";

/// Execution records kept per agent; older ones are dropped.
const MAX_HISTORY: usize = 100;

/// Bounded execution log addressed by a running sequence number, so a
/// record stays reachable while newer ones evict older ones.
#[derive(Debug, Default)]
struct History {
    records: VecDeque<ExecutionRecord>,
    evicted: u64,
}

impl History {
    fn push(&mut self, record: ExecutionRecord) -> u64 {
        self.records.push_back(record);
        while self.records.len() > MAX_HISTORY {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.evicted + self.records.len() as u64 - 1
    }

    fn get_mut(&mut self, seq: u64) -> Option<&mut ExecutionRecord> {
        let offset = seq.checked_sub(self.evicted)?;
        self.records.get_mut(usize::try_from(offset).ok()?)
    }
}

pub struct RoleAgent {
    metadata: Mutex<AgentMetadata>,
    history: Mutex<History>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RoleAgent {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType) -> Self {
        let (name, description, capabilities) = role_profile(agent_type);
        let now = chrono::Utc::now().to_rfc3339();
        let agent_id = agent_id.into();
        info!(%agent_id, agent_type = %agent_type, capabilities = capabilities.len(), "role agent created");
        Self {
            metadata: Mutex::new(AgentMetadata {
                agent_id,
                agent_type,
                name: name.to_string(),
                description: description.to_string(),
                version: AGENT_VERSION.to_string(),
                capabilities,
                status: AgentStatus::Idle,
                created_at: now.clone(),
                updated_at: now,
            }),
            history: Mutex::new(History::default()),
        }
    }

    /// Default instance of a role, id `"{type}_agent"`.
    pub fn of_type(agent_type: AgentType) -> Self {
        Self::new(format!("{agent_type}_agent"), agent_type)
    }

    pub fn agent_id(&self) -> String {
        lock(&self.metadata).agent_id.clone()
    }

    pub fn agent_type(&self) -> AgentType {
        lock(&self.metadata).agent_type
    }

    pub fn name(&self) -> String {
        lock(&self.metadata).name.clone()
    }

    pub fn status(&self) -> AgentStatus {
        lock(&self.metadata).status
    }

    pub fn set_status(&self, status: AgentStatus) {
        let mut meta = lock(&self.metadata);
        meta.status = status;
        meta.updated_at = chrono::Utc::now().to_rfc3339();
    }

    pub fn capabilities(&self) -> Vec<AgentCapability> {
        lock(&self.metadata).capabilities.clone()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        lock(&self.metadata).capabilities.iter().any(|c| c.name == name)
    }

    pub fn metadata(&self) -> AgentMetadata {
        lock(&self.metadata).clone()
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        lock(&self.history).records.iter().cloned().collect()
    }

    /// Run the role on `task` and record the attempt.
    pub async fn execute(&self, llm: &AgentsState, task: &MultiAgentState) -> Value {
        let agent_id = self.agent_id();
        let agent_type = self.agent_type();
        info!(%agent_id, description = %task.task.description, "agent executing task");
        self.set_status(AgentStatus::Busy);
        let index = lock(&self.history).push(ExecutionRecord {
            task: serde_json::to_value(&task.task).unwrap_or(Value::Null),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: "started".into(),
            result: None,
            error: None,
        });

        let outcome = self.process(llm, task).await;
        let mut history = lock(&self.history);
        match outcome {
            Ok(result) => {
                if let Some(record) = history.get_mut(index) {
                    record.status = "completed".into();
                    record.result = Some(result.clone());
                }
                drop(history);
                self.set_status(AgentStatus::Idle);
                info!(%agent_id, "agent task completed");
                result
            }
            Err(error) => {
                if let Some(record) = history.get_mut(index) {
                    record.status = "failed".into();
                    record.error = Some(error.clone());
                }
                drop(history);
                self.set_status(AgentStatus::Error);
                tracing::error!(%agent_id, %error, "agent task failed");
                json!({
                    "agent_id": agent_id,
                    "agent_type": agent_type.as_str(),
                    "error": error,
                    "success": false,
                })
            }
        }
    }

    /// Free-form analysis of `input` with this role's prompt.
    pub async fn analyze(&self, llm: &AgentsState, input: &str) -> Value {
        let outcome = self.ask(llm, format!("Analyse the following:\n{input}"), None).await;
        self.helper_result("analysis", outcome)
    }

    /// Ask this role to check `result` for correctness and completeness.
    pub async fn validate(&self, llm: &AgentsState, result: &Value) -> Value {
        let outcome = self
            .ask(llm, format!("Check the following result for correctness and completeness:\n{result}"), None)
            .await;
        let mut v = self.helper_result("validation", outcome);
        if v["success"] == true {
            v["is_valid"] = json!(true);
        }
        v
    }

    fn helper_result(&self, key: &str, outcome: Result<String, String>) -> Value {
        let mut v = json!({ "agent_id": self.agent_id(), "agent_type": self.agent_type().as_str() });
        match outcome {
            Ok(text) => {
                v[key] = json!(text);
                v["success"] = json!(true);
            }
            Err(e) => {
                v["error"] = json!(e);
                v["success"] = json!(false);
            }
        }
        v
    }

    async fn ask(&self, llm: &AgentsState, user: String, temperature: Option<f32>) -> Result<String, String> {
        let system = prompt::preamble(&llm.config.prompts_dir, &[])
            .layer(&self.agent_type().prompt_file())
            .build();
        let mut request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)]);
        request.temperature = temperature;
        let resp = llm.llm_chat(request).await.map_err(|e| e.to_string())?;
        if resp.text.trim().is_empty() {
            return Err("empty model reply".into());
        }
        Ok(resp.text)
    }

    fn base_result(&self, output: &str) -> Value {
        let meta = self.metadata();
        json!({
            "agent_id": meta.agent_id,
            "agent_type": meta.agent_type.as_str(),
            "agent_name": meta.name,
            "output": output,
            "success": true,
        })
    }

    async fn process(&self, llm: &AgentsState, state: &MultiAgentState) -> Result<Value, String> {
        let task_block = describe_task(state);
        match self.agent_type() {
            AgentType::Analyst => {
                let text = self.ask(llm, format!("{task_block}\n\nAnalyse this task."), None).await?;
                let mut v = self.base_result(&text);
                v["analysis"] = json!(text);
                Ok(v)
            }
            AgentType::Researcher => {
                let text = self.ask(llm, format!("{task_block}\n\nResearch this task."), None).await?;
                let mut v = self.base_result(&text);
                v["findings"] = json!(text);
                Ok(v)
            }
            AgentType::Planner => {
                let mut user = format!("{task_block}\n\nPlan this task.");
                if let Some(analysis) = state.output_of(AgentType::Analyst) {
                    user.push_str(&format!("\n\nAnalysis:\n{analysis}"));
                }
                let text = self.ask(llm, user, Some(0.3)).await?;
                let (plan, summary) = parse_plan(&text, &state.task.description);
                let mut v = self.base_result(summary.as_deref().unwrap_or(&text));
                v["plan"] = serde_json::to_value(&plan).map_err(|e| e.to_string())?;
                Ok(v)
            }
            AgentType::Executor => {
                let mut user = task_block;
                if let Some(analysis) = state.output_of(AgentType::Analyst) {
                    user.push_str(&format!("\n\nAnalysis:\n{analysis}"));
                }
                if !state.task_plan.is_empty() {
                    let steps: Vec<String> = state
                        .task_plan
                        .iter()
                        .enumerate()
                        .map(|(i, s)| format!("{}. {} ({})", i + 1, s.description, s.agent_type))
                        .collect();
                    user.push_str(&format!("\n\nPlan:\n{}", steps.join("\n")));
                }
                if !state.improvement_suggestions.is_empty() {
                    user.push_str(&format!(
                        "\n\nThe previous attempt was rejected. Apply these suggestions:\n{}",
                        bullets(&state.improvement_suggestions)
                    ));
                    if let Some(previous) = state.output_of(AgentType::Executor) {
                        user.push_str(&format!("\n\nPrevious attempt:\n{previous}"));
                    }
                }
                user.push_str("\n\nCarry out the task now.");
                let text = self.ask(llm, user, None).await?;
                let mut v = self.base_result(&text);
                v["result"] = json!(text);
                Ok(v)
            }
            AgentType::Reviewer => {
                let Some(executed) = state.output_of(AgentType::Executor) else {
                    warn!("no executor output to review");
                    let mut v = self.base_result("");
                    v["passed"] = json!(false);
                    v["error"] = json!("no execution result to review");
                    v["success"] = json!(false);
                    return Ok(v);
                };
                let user = format!("{task_block}\n\nResult to review:\n{executed}");
                let text = self.ask(llm, user, Some(0.2)).await?;
                let review = parse_review(&text);
                let mut v = self.base_result(&text);
                v["passed"] = json!(review.passed);
                v["score"] = json!(review.score);
                v["issues"] = json!(review.issues);
                v["suggestions"] = json!(review.suggestions);
                Ok(v)
            }
            AgentType::Coordinator => Err("coordinator agents do not execute tasks".into()),
        }
    }
}

fn bullets(items: &[String]) -> String {
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

fn describe_task(state: &MultiAgentState) -> String {
    let task = &state.task;
    let mut out = format!("Task: {}", task.description);
    if let Some(t) = &task.task_type {
        out.push_str(&format!("\nType: {t}"));
    }
    if let Some(c) = &task.context {
        out.push_str(&format!("\nContext: {c}"));
    }
    if task.requirements.is_empty() {
        out.push_str("\nRequirements: none stated");
    } else {
        out.push_str(&format!("\nRequirements:\n{}", bullets(&task.requirements)));
    }
    out
}

#[derive(Debug, Default, Deserialize)]
struct RawPlan {
    #[serde(default)]
    subtasks: Vec<Subtask>,
    #[serde(default)]
    summary: Option<String>,
}

/// Planner output; an unparsable or empty plan becomes one executor step.
fn parse_plan(text: &str, description: &str) -> (Vec<Subtask>, Option<String>) {
    match parse_loose::<RawPlan>(text) {
        Ok(raw) if !raw.subtasks.is_empty() => (raw.subtasks, raw.summary),
        Ok(raw) => (fallback_plan(description), raw.summary),
        Err(e) => {
            warn!(error = %e, "planner reply is not a JSON plan, using a single step");
            (fallback_plan(description), None)
        }
    }
}

fn fallback_plan(description: &str) -> Vec<Subtask> {
    vec![Subtask { description: description.to_string(), agent_type: AgentType::Executor.as_str().into() }]
}

#[derive(Debug, Default, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Reviewer output; unparsable reviews count as failed with no suggestions.
pub fn parse_review(text: &str) -> Review {
    parse_loose::<Review>(text).unwrap_or_else(|e| {
        warn!(error = %e, "reviewer reply is not JSON, treating as not passed");
        Review::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::subsystems::agents::multi::state::{CoordinationMode, TaskSpec};
    use crate::subsystems::agents::test_support::Harness;

    fn task(mode: CoordinationMode) -> MultiAgentState {
        MultiAgentState::new(
            TaskSpec {
                description: "Draft a release note".into(),
                requirements: vec!["under 100 words".into()],
                ..TaskSpec::default()
            },
            None,
            mode,
            10,
            3,
        )
    }

    #[test]
    fn plan_parsing() {
        let (plan, summary) = parse_plan(
            r#"```json
{"subtasks": [{"description": "collect changes", "agent_type": "researcher"}, {"description": "write"}], "summary": "two steps"}
```"#,
            "x",
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].agent_type(), AgentType::Researcher);
        assert_eq!(plan[1].agent_type, "executor");
        assert_eq!(summary.as_deref(), Some("two steps"));

        let (plan, _) = parse_plan("first do this, then that", "release note");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].description, "release note");
    }

    #[test]
    fn review_parsing() {
        let r = parse_review(r#"Verdict: {"passed": false, "score": 55, "suggestions": ["shorten"]}"#);
        assert!(!r.passed);
        assert_eq!(r.score, Some(55.0));
        assert_eq!(r.suggestions, vec!["shorten".to_string()]);
        assert!(!parse_review("looks good").passed);
    }

    #[test]
    fn task_description_lists_requirements() {
        let d = describe_task(&task(CoordinationMode::Sequential));
        assert!(d.starts_with("Task: Draft a release note"));
        assert!(d.contains("- under 100 words"));
    }

    #[tokio::test]
    async fn execute_records_history_and_status() {
        let h = Harness::start([LlmResponse::text("Key goal: inform users.")]).await;
        let agent = RoleAgent::of_type(AgentType::Analyst);
        let result = agent.execute(&h.state, &task(CoordinationMode::Sequential)).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["agent_id"], "analyst_agent");
        assert_eq!(result["output"], "Key goal: inform users.");
        assert_eq!(agent.status(), AgentStatus::Idle);
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        h.stop().await;
    }

    #[test]
    fn history_keeps_the_latest_hundred() {
        let record = |n: usize| ExecutionRecord {
            task: json!({ "n": n }),
            timestamp: String::new(),
            status: "started".into(),
            result: None,
            error: None,
        };
        let mut history = History::default();
        let first = history.push(record(0));
        let mut last = first;
        for n in 1..150 {
            last = history.push(record(n));
        }
        assert_eq!(history.records.len(), MAX_HISTORY);
        assert_eq!(history.records[0].task["n"], 50);
        assert!(history.get_mut(first).is_none());
        history.get_mut(last).unwrap().status = "completed".into();
        assert_eq!(history.records.back().unwrap().status, "completed");
        assert_eq!(history.records.back().unwrap().task["n"], 149);
    }

    #[tokio::test]
    async fn failure_sets_error_status() {
        let h = Harness::start([LlmResponse::text("   ")]).await;
        let agent = RoleAgent::of_type(AgentType::Executor);
        let result = agent.execute(&h.state, &task(CoordinationMode::Sequential)).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["agent_type"], "executor");
        assert_eq!(agent.status(), AgentStatus::Error);
        assert_eq!(agent.history()[0].status, "failed");
        h.stop().await;
    }

    #[tokio::test]
    async fn reviewer_without_execution_does_not_pass() {
        let h = Harness::echo().await;
        let agent = RoleAgent::of_type(AgentType::Reviewer);
        let result = agent.execute(&h.state, &task(CoordinationMode::Feedback)).await;
        assert_eq!(result["passed"], false);
        assert_eq!(result["success"], false);
        h.stop().await;
    }

    #[tokio::test]
    async fn helpers_wrap_model_text() {
        let h = Harness::start([LlmResponse::text("fine"), LlmResponse::text("valid")]).await;
        let agent = RoleAgent::of_type(AgentType::Researcher);
        assert_eq!(agent.analyze(&h.state, "data").await["analysis"], "fine");
        let v = agent.validate(&h.state, &json!({"output": "x"})).await;
        assert_eq!(v["validation"], "valid");
        assert_eq!(v["is_valid"], true);
        h.stop().await;
    }
}
