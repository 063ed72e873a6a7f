//! Coordinator: drives role agents through one of four collaboration modes
//! and aggregates their outputs.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::subsystems::agents::AgentsState;

use super::base::{RoleAgent, parse_review};
use super::registry::AgentRegistry;
use super::state::{CoordinationMode, MultiAgentState, Subtask};
use super::types::AgentType;

static AGENT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:[A-Za-z][A-Za-z _-]*|[\x{4e00}-\x{9fa5}]+)\]:\s*").expect("valid regex"));
static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```json\s*").expect("valid regex"));
static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```\s*").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Roles run in parallel mode when the task has no plan.
const PARALLEL_ROLES: [AgentType; 4] = [AgentType::Analyst, AgentType::Planner, AgentType::Researcher, AgentType::Executor];

pub struct AgentCoordinator {
    registry: Arc<AgentRegistry>,
}

impl AgentCoordinator {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub async fn coordinate(&self, llm: Arc<AgentsState>, mut state: MultiAgentState) -> MultiAgentState {
        info!(
            mode = %state.coordination_mode,
            description = %state.task.description,
            "coordinating task"
        );
        match state.coordination_mode {
            CoordinationMode::Sequential | CoordinationMode::Feedback => self.run_steps(&llm, &mut state).await,
            CoordinationMode::Parallel => self.run_parallel(llm, &mut state).await,
            CoordinationMode::Hierarchical => self.run_hierarchical(&llm, &mut state).await,
        }
        if state.error.is_none() {
            let aggregated = aggregate(&state);
            state.mark_finished(aggregated);
        }
        state
    }

    fn find(&self, agent_type: AgentType) -> Option<Arc<RoleAgent>> {
        self.registry.find_best_agent(Some(agent_type), &[], true)
    }

    async fn step(&self, llm: &AgentsState, state: &mut MultiAgentState, agent: &RoleAgent) -> Value {
        let agent_id = agent.agent_id();
        state.current_agent = Some(agent_id.clone());
        let result = agent.execute(llm, state).await;
        state.update_agent_result(&agent_id, result.clone());
        state.iteration += 1;
        result
    }

    /// Sequential and feedback modes follow [`MultiAgentState::route_next_agent`].
    /// The first failing agent ends the run.
    async fn run_steps(&self, llm: &AgentsState, state: &mut MultiAgentState) {
        while let Some(role) = state.route_next_agent() {
            state.next_agent = Some(role.as_str().to_string());
            if role == AgentType::Executor && state.coordination_mode == CoordinationMode::Feedback {
                state.feedback_round += 1;
                info!(round = state.feedback_round, max = state.max_feedback_rounds, "feedback round");
            }
            let Some(agent) = self.find(role) else {
                warn!(role = %role, "no agent available for role, skipping");
                state.current_role = Some(role);
                continue;
            };
            let result = self.step(llm, state, &agent).await;
            state.current_role = Some(role);

            if result["success"] != true {
                let name = agent.name();
                tracing::error!(agent = %name, "agent failed, stopping");
                state.mark_error(format!("agent {name} failed"));
                return;
            }
            match role {
                AgentType::Planner => state.task_plan = plan_of(&result),
                AgentType::Reviewer => {
                    state.review_passed = result["passed"] == true;
                    state.improvement_suggestions = strings(&result["suggestions"]);
                    state.review_result = Some(result);
                    if !state.review_passed {
                        info!(suggestions = state.improvement_suggestions.len(), "review not passed");
                    }
                }
                _ => {}
            }
        }
    }

    /// Fan out over the task plan.  Without a supplied plan the planner runs
    /// first and its subtasks drive the fan-out; if no plan comes back every
    /// fixed role takes the whole task.
    async fn run_parallel(&self, llm: Arc<AgentsState>, state: &mut MultiAgentState) {
        let mut planner_ran = false;
        if state.task_plan.is_empty() {
            if let Some(planner) = self.find(AgentType::Planner) {
                let result = self.step(&llm, state, &planner).await;
                planner_ran = true;
                if result["success"] == true {
                    state.task_plan = plan_of(&result);
                } else {
                    warn!("planner failed, running every role on the whole task");
                }
            }
        }

        let subtasks: Vec<Subtask> = if state.task_plan.is_empty() {
            PARALLEL_ROLES
                .iter()
                .filter(|r| !(planner_ran && **r == AgentType::Planner))
                .map(|r| Subtask { description: state.task.description.clone(), agent_type: r.as_str().into() })
                .collect()
        } else {
            state.task_plan.clone()
        };
        info!(subtasks = subtasks.len(), "parallel fan-out");

        let mut set = JoinSet::new();
        for (index, subtask) in subtasks.iter().enumerate() {
            let Some(agent) = self.find(subtask.agent_type()) else {
                warn!(agent_type = %subtask.agent_type, "no agent for subtask");
                continue;
            };
            let scoped = state.for_subtask(index, subtask);
            let llm = llm.clone();
            set.spawn(async move {
                let result = agent.execute(&llm, &scoped).await;
                (index, agent.agent_id(), result)
            });
        }

        let mut finished = Vec::with_capacity(subtasks.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => warn!(error = %e, "parallel agent task aborted"),
            }
        }
        // Record in subtask order so aggregation is deterministic.
        finished.sort_by_key(|(index, _, _)| *index);
        for (_, agent_id, result) in finished {
            state.update_agent_result(&agent_id, result);
            state.iteration += 1;
        }
    }

    async fn run_hierarchical(&self, llm: &AgentsState, state: &mut MultiAgentState) {
        if let Some(planner) = self.find(AgentType::Planner) {
            let result = self.step(llm, state, &planner).await;
            state.task_plan = plan_of(&result);
        }
        if let Some(executor) = self.find(AgentType::Executor) {
            self.step(llm, state, &executor).await;
        }
        if let Some(reviewer) = self.find(AgentType::Reviewer) {
            let result = self.step(llm, state, &reviewer).await;
            state.review_passed = result["passed"] == true;
            if let Some(output) = result["output"].as_str() {
                state.improvement_suggestions = parse_review(output).suggestions;
            }
            state.review_result = Some(result);
        }
    }
}

fn plan_of(result: &Value) -> Vec<Subtask> {
    serde_json::from_value(result["plan"].clone()).unwrap_or_default()
}

fn strings(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Strip agent tags and code fences, collapse blank runs, trim.
pub fn clean_output(raw: &str) -> String {
    let s = AGENT_TAG.replace_all(raw, "");
    let s = JSON_FENCE.replace_all(&s, "");
    let s = FENCE.replace_all(&s, "");
    let s = BLANK_RUN.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Merge agent results into the final answer.  Priority: executor, analyst,
/// researcher, planner, then the last result.
pub fn aggregate(state: &MultiAgentState) -> Value {
    let pick = |role: AgentType| state.output_of(role).map(clean_output).filter(|s| !s.is_empty());
    let mut output = pick(AgentType::Executor)
        .or_else(|| pick(AgentType::Analyst))
        .or_else(|| pick(AgentType::Researcher))
        .or_else(|| pick(AgentType::Planner))
        .or_else(|| {
            state
                .agent_history
                .last()
                .and_then(|h| h.result["output"].as_str())
                .map(clean_output)
        })
        .unwrap_or_default();
    if output.is_empty() {
        output = format!("task completed, {} agents involved", state.agent_results.len());
    }

    json!({
        "task": state.task,
        "coordination_mode": state.coordination_mode.as_str(),
        "agents_involved": state.agent_results.keys().collect::<Vec<_>>(),
        "results": state.agent_results,
        "summary": output,
        "output": output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::subsystems::agents::multi::state::TaskSpec;
    use crate::subsystems::agents::test_support::Harness;

    fn task(mode: CoordinationMode) -> MultiAgentState {
        MultiAgentState::new(
            TaskSpec { description: "Summarise the roadmap".into(), ..TaskSpec::default() },
            None,
            mode,
            10,
            2,
        )
    }

    fn coordinator() -> AgentCoordinator {
        AgentCoordinator::new(Arc::new(AgentRegistry::with_default_roles()))
    }

    #[test]
    fn clean_output_strips_tags_and_fences() {
        let raw = "[Executor]: Done.\n\n\n\n```json\n{\"a\": 1}\n```\n[执行者]: ok  ";
        assert_eq!(clean_output(raw), "Done.\n\n{\"a\": 1}\nok");
    }

    #[test]
    fn aggregation_priority() {
        let mut s = task(CoordinationMode::Sequential);
        s.update_agent_result("planner_agent", json!({"agent_type": "planner", "output": "plan"}));
        s.update_agent_result("analyst_agent", json!({"agent_type": "analyst", "output": "analysis"}));
        assert_eq!(aggregate(&s)["output"], "analysis");
        s.update_agent_result("executor_agent", json!({"agent_type": "executor", "output": "[Executor]: result"}));
        let agg = aggregate(&s);
        assert_eq!(agg["output"], "result");
        assert_eq!(agg["summary"], "result");
        assert_eq!(agg["agents_involved"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn aggregation_falls_back_to_count() {
        let mut s = task(CoordinationMode::Parallel);
        s.update_agent_result("reviewer_agent", json!({"agent_type": "reviewer", "output": ""}));
        assert_eq!(aggregate(&s)["output"], "task completed, 1 agents involved");
    }

    #[tokio::test]
    async fn sequential_runs_four_roles() {
        let h = Harness::start([
            LlmResponse::text("analysis text"),
            LlmResponse::text(r#"{"subtasks": [{"description": "read", "agent_type": "researcher"}], "summary": "one step"}"#),
            LlmResponse::text("[Executor]: final roadmap summary"),
            LlmResponse::text(r#"{"passed": true, "score": 90, "suggestions": []}"#),
        ])
        .await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Sequential)).await;
        assert!(out.error.is_none());
        assert!(out.is_finished);
        assert_eq!(out.iteration, 4);
        assert_eq!(out.task_plan.len(), 1);
        assert!(out.review_passed);
        assert_eq!(out.final_result.unwrap()["output"], "final roadmap summary");
        h.stop().await;
    }

    #[tokio::test]
    async fn sequential_stops_at_first_failure() {
        // Empty analyst reply fails the first step.
        let h = Harness::start([LlmResponse::text("")]).await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Sequential)).await;
        assert_eq!(out.error.as_deref(), Some("agent Analyst failed"));
        assert_eq!(out.agent_history.len(), 1);
        assert!(out.final_result.is_none());
        h.stop().await;
    }

    #[tokio::test]
    async fn feedback_retries_until_review_passes() {
        let h = Harness::start([
            LlmResponse::text("draft one"),
            LlmResponse::text(r#"{"passed": false, "score": 40, "suggestions": ["add dates"]}"#),
            LlmResponse::text("draft two with dates"),
            LlmResponse::text(r#"{"passed": true, "score": 85}"#),
        ])
        .await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Feedback)).await;
        assert_eq!(out.feedback_round, 2);
        assert!(out.review_passed);
        assert_eq!(out.final_result.unwrap()["output"], "draft two with dates");
        h.stop().await;
    }

    #[tokio::test]
    async fn feedback_respects_round_budget() {
        let reject = r#"{"passed": false, "suggestions": ["again"]}"#;
        let h = Harness::start([
            LlmResponse::text("d1"),
            LlmResponse::text(reject),
            LlmResponse::text("d2"),
            LlmResponse::text(reject),
        ])
        .await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Feedback)).await;
        assert_eq!(out.feedback_round, 2);
        assert!(!out.review_passed);
        assert_eq!(out.improvement_suggestions, vec!["again".to_string()]);
        assert!(out.is_finished);
        h.stop().await;
    }

    #[tokio::test]
    async fn parallel_fans_out_planner_subtasks() {
        // Planner reply is scripted; the subtask agents get echoes.
        let h = Harness::start([LlmResponse::text(
            r#"{"subtasks": [{"description": "gather facts", "agent_type": "researcher"},
                             {"description": "weigh options", "agent_type": "analyst"}]}"#,
        )])
        .await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Parallel)).await;
        assert!(out.error.is_none());
        assert_eq!(out.task_plan.len(), 2);
        let mut ran: Vec<_> = out.agent_results.keys().cloned().collect();
        ran.sort();
        assert_eq!(ran, ["analyst_agent", "planner_agent", "researcher_agent"]);
        let research = out.agent_results["researcher_agent"]["output"].as_str().unwrap();
        assert!(research.starts_with("[echo] Task: gather facts"), "{research}");
        let analysis = out.agent_results["analyst_agent"]["output"].as_str().unwrap();
        assert!(analysis.starts_with("[echo] Task: weigh options"), "{analysis}");
        h.stop().await;
    }

    #[tokio::test]
    async fn parallel_uses_supplied_plan_without_planner() {
        let h = Harness::echo().await;
        let mut state = task(CoordinationMode::Parallel);
        state.task_plan = vec![Subtask { description: "write it".into(), agent_type: "executor".into() }];
        let out = coordinator().coordinate(h.state.clone(), state).await;
        assert_eq!(out.agent_results.len(), 1);
        let output = out.final_result.unwrap()["output"].as_str().unwrap().to_string();
        assert!(output.starts_with("[echo] Task: write it"), "{output}");
        h.stop().await;
    }

    #[tokio::test]
    async fn parallel_without_a_plan_runs_the_fixed_roles() {
        // Empty planner reply fails the planner step.
        let h = Harness::start([LlmResponse::text("")]).await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Parallel)).await;
        assert!(out.error.is_none());
        assert!(out.task_plan.is_empty());
        assert_eq!(out.agent_results["planner_agent"]["success"], false);
        for role in ["analyst_agent", "researcher_agent", "executor_agent"] {
            assert_eq!(out.agent_results[role]["success"], true, "{role}");
        }
        assert!(!out.agent_results.contains_key("reviewer_agent"));
        // Executor output wins; the dummy provider echoes the prompt.
        let output = out.final_result.unwrap()["output"].as_str().unwrap().to_string();
        assert!(output.starts_with("[echo] Task: Summarise the roadmap"));
        h.stop().await;
    }

    #[tokio::test]
    async fn hierarchical_plans_executes_reviews() {
        let h = Harness::start([
            LlmResponse::text(r#"{"subtasks": [{"description": "a"}, {"description": "b"}]}"#),
            LlmResponse::text("executed plan"),
            LlmResponse::text(r#"{"passed": true}"#),
        ])
        .await;
        let out = coordinator().coordinate(h.state.clone(), task(CoordinationMode::Hierarchical)).await;
        assert_eq!(out.task_plan.len(), 2);
        assert!(out.review_passed);
        assert_eq!(out.agent_history.len(), 3);
        assert_eq!(out.final_result.unwrap()["output"], "executed plan");
        h.stop().await;
    }
}
