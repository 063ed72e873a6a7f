//! Agents subsystem: chat supervisor, worker agents and the multi-agent
//! coordinator behind the `agents/*` bus methods.
//!
//! | Method                   | Payload          | Reply           |
//! |--------------------------|------------------|-----------------|
//! | `agents/chat`            | `CommsMessage`   | `AgentReply`    |
//! | `agents/task`            | `JsonRequest`    | `JsonResponse`  |
//! | `agents/list`            | any              | `JsonResponse`  |
//! | `agents/detail`          | `AgentQuery`     | `JsonResponse`  |
//! | `agents/statistics`      | any              | `JsonResponse`  |
//! | `agents/sessions`        | any              | `JsonResponse`  |
//! | `agents/sessions/detail` | `SessionQuery`   | `JsonResponse`  |
//! | `agents/sessions/export` | `SessionQuery`   | `JsonResponse`  |
//! | `agents/sessions/delete` | `SessionQuery`   | `JsonResponse`  |
//! | `agents/memory/stats`    | any              | `JsonResponse`  |
//! | `agents/memory/clear`    | any              | `JsonResponse`  |
//! | `agents/health`          | any              | `JsonResponse`  |
//! | `agents/status`          | any              | `JsonResponse`  |
//! | `agents/decide`          | `JsonRequest`    | `JsonResponse`  |
//! | `agents/recommend`       | `JsonRequest`    | `JsonResponse`  |
//! | `agents/recommend/feedback` | `JsonRequest` | `JsonResponse`  |
//! | `agents/recommend/stats` | any              | `JsonResponse`  |
//! | `agents/recommend/session` | `SessionQuery` | `JsonResponse`  |
//! | `agents/recommend/trends` | `JsonRequest` or any | `JsonResponse` |
//! | `agents/ratings/submit`  | `JsonRequest`    | `JsonResponse`  |
//! | `agents/ratings/stats`   | any              | `JsonResponse`  |
//! | `agents/ratings/weights` | `JsonRequest` sets, any reads | `JsonResponse` |
//!
//! Agents reach the LLM and tools subsystems only through the typed methods
//! on [`AgentsState`].  [`AgentsSubsystem`] never blocks the supervisor:
//! cheap lookups reply inline, everything else runs in a spawned task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{OwnedMutexGuard, oneshot};
use tracing::{debug, info};

use crate::config::{AgentsConfig, RatingWeights};
use crate::error::AppError;
use crate::llm::{ChatRequest, LlmResponse, ToolSpec};
use crate::subsystems::memory::{
    Checkpointer, FeedbackManager, FeedbackSubmission, RatingManager, RatingSubmission, validate_session_id,
};
use crate::supervisor::bus::{BusError, BusHandle, BusPayload, BusResult};
use crate::supervisor::component_info::{ComponentInfo, ComponentStatusResponse};
use crate::supervisor::dispatch::{BusHandler, reply_method_not_found};
use crate::supervisor::health::{HealthReporter, SubsystemHealth};

pub(crate) mod core;
pub mod chat;
pub mod decision;
pub mod multi;
pub mod recommend;
pub mod workers;

use multi::{AgentCoordinator, AgentRegistry, CoordinationMode, MultiAgentState, Subtask, TaskSpec};
use recommend::{QuestionRecommender, RecommendationRequest};
use workers::WorkerKind;

// ── AgentsState ───────────────────────────────────────────────────────────────

/// Shared capability surface passed to every agent.
///
/// The raw [`BusHandle`] is private: agents call typed methods and cannot
/// address arbitrary bus targets.
pub struct AgentsState {
    bus: BusHandle,
    /// Session checkpoints for the chat flow and task runs.
    pub checkpointer: Arc<Checkpointer>,
    /// Answer quality ratings, fed by the quality worker and the API.
    pub ratings: Arc<RatingManager>,
    /// Feedback on recommended questions.
    pub feedback: Arc<FeedbackManager>,
    pub config: AgentsConfig,
    /// One turn at a time per session; entries drop with their last guard.
    session_locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl AgentsState {
    /// State with in-memory rating and feedback stores using default weights.
    pub fn new(bus: BusHandle, checkpointer: Arc<Checkpointer>, config: AgentsConfig) -> Self {
        Self {
            bus,
            checkpointer,
            ratings: Arc::new(RatingManager::in_memory(Default::default())),
            feedback: Arc::new(FeedbackManager::in_memory()),
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_stores(mut self, ratings: Arc<RatingManager>, feedback: Arc<FeedbackManager>) -> Self {
        self.ratings = ratings;
        self.feedback = feedback;
        self
    }

    /// Wait for exclusive use of `session_id`.  Held for a whole
    /// restore-run-checkpoint cycle.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.session_locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(session_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(session_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    async fn call(&self, method: &str, payload: BusPayload) -> Result<BusPayload, BusError> {
        match self.bus.request(method, payload).await {
            Ok(result) => result,
            Err(e) => Err(BusError::internal(e.to_string())),
        }
    }

    /// One chat-completion round-trip through the LLM subsystem.
    pub async fn llm_chat(&self, request: ChatRequest) -> Result<LlmResponse, BusError> {
        match self.call("llm/chat", BusPayload::LlmChat(request)).await? {
            BusPayload::LlmReply(resp) => Ok(resp),
            other => Err(BusError::internal(format!("unexpected llm reply: {other:?}"))),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, BusError> {
        match self.call("tools/list", BusPayload::ToolList).await? {
            BusPayload::ToolSpecs { tools } => Ok(tools),
            other => Err(BusError::internal(format!("unexpected tools reply: {other:?}"))),
        }
    }

    /// Run a tool.  `Ok(None)` means the tool succeeded without output; a
    /// tool-level failure comes back as an error carrying its message.
    pub async fn execute_tool(
        &self,
        tool: &str,
        args_json: String,
        session_id: Option<String>,
    ) -> Result<Option<String>, BusError> {
        let payload = BusPayload::ToolRequest { tool: tool.to_string(), args_json, session_id };
        match self.call("tools/execute", payload).await? {
            BusPayload::ToolResponse { ok: true, data_json, .. } => Ok(data_json),
            BusPayload::ToolResponse { error, .. } => {
                Err(BusError::internal(error.unwrap_or_else(|| format!("tool {tool} failed"))))
            }
            other => Err(BusError::internal(format!("unexpected tool reply: {other:?}"))),
        }
    }
}

/// Rejected caller input becomes `invalid_params`; anything else is internal.
fn bus_error(e: AppError) -> BusError {
    match e {
        AppError::InvalidInput(msg) => BusError::invalid_params(msg),
        other => BusError::internal(other.to_string()),
    }
}

/// Decode a `JsonRequest` body.
fn json_body<T: DeserializeOwned>(method: &str, payload: BusPayload) -> Result<T, BusError> {
    let BusPayload::JsonRequest { data } = payload else {
        return Err(BusError::invalid_params(format!("{method} expects a JsonRequest payload")));
    };
    serde_json::from_str(&data).map_err(|e| BusError::invalid_params(format!("invalid {method} request: {e}")))
}

const DEFAULT_TREND_WINDOW: usize = 100;

#[derive(Deserialize)]
struct DecideRequest {
    query: String,
}

#[derive(Deserialize)]
struct TrendsRequest {
    #[serde(default)]
    limit: Option<usize>,
}

// ── Task requests ─────────────────────────────────────────────────────────────

/// Body of `agents/task`.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    #[serde(rename = "type", default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub coordination_mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_feedback_rounds: Option<u32>,
    /// Subtasks for parallel mode; the planner supplies them when absent.
    #[serde(default)]
    pub plan: Vec<Subtask>,
}

async fn run_task(
    state: Arc<AgentsState>,
    coordinator: Arc<AgentCoordinator>,
    req: TaskRequest,
) -> Result<Value, BusError> {
    if req.description.trim().is_empty() {
        return Err(BusError::invalid_params("task description must not be empty"));
    }
    if let Some(session_id) = &req.session_id {
        validate_session_id(session_id).map_err(bus_error)?;
    }
    let mode = req
        .coordination_mode
        .as_deref()
        .map_or(CoordinationMode::Sequential, CoordinationMode::parse_or_sequential);
    let task = TaskSpec {
        description: req.description,
        task_type: req.task_type,
        context: req.context,
        requirements: req.requirements,
    };
    let mut initial = MultiAgentState::new(
        task,
        req.session_id.clone(),
        mode,
        req.max_iterations.unwrap_or(state.config.max_iterations),
        req.max_feedback_rounds.unwrap_or(state.config.max_feedback_rounds),
    );
    initial.task_plan = req.plan;
    info!(mode = %mode, session_id = ?req.session_id, "multi-agent task received");

    let done = coordinator.coordinate(state.clone(), initial).await;

    if let Some(session_id) = &done.session_id {
        let cp = &state.checkpointer;
        let _turn = state.lock_session(session_id).await;
        cp.create_session(Some(session_id), json!({ "kind": "task" })).await.map_err(bus_error)?;
        let snapshot = serde_json::to_value(&done).map_err(|e| BusError::internal(e.to_string()))?;
        cp.record_checkpoint(session_id, snapshot).await.map_err(bus_error)?;
    }

    Ok(json!({
        "task": done.task,
        "coordination_mode": done.coordination_mode.as_str(),
        "agents_involved": done.agent_results.keys().collect::<Vec<_>>(),
        "final_result": done.final_result,
        "is_finished": done.is_finished,
        "error": done.error,
        "session_id": done.session_id,
    }))
}

// ── Subsystem ─────────────────────────────────────────────────────────────────

pub struct AgentsSubsystem {
    state: Arc<AgentsState>,
    coordinator: Arc<AgentCoordinator>,
    recommender: Arc<QuestionRecommender>,
    reporter: Option<HealthReporter>,
}

impl AgentsSubsystem {
    /// Subsystem with the default role agents registered.
    pub fn new(state: Arc<AgentsState>) -> Self {
        let registry = Arc::new(AgentRegistry::with_default_roles());
        Self {
            state,
            coordinator: Arc::new(AgentCoordinator::new(registry)),
            recommender: Arc::new(QuestionRecommender::new()),
            reporter: None,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.coordinator.registry()
    }

    /// Attach a health reporter and report initial healthy state.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        let roles = self.registry().len();
        let r = reporter.clone();
        tokio::spawn(async move {
            r.set_healthy_with("ok", Some(json!({ "workers": WorkerKind::ALL.len(), "role_agents": roles })))
                .await;
        });
        self.reporter = Some(reporter);
        self
    }

    /// Reply with JSON computed on a spawned task.
    fn spawn_json<F>(reply_tx: oneshot::Sender<BusResult>, fut: F)
    where
        F: Future<Output = Result<Value, BusError>> + Send + 'static,
    {
        tokio::spawn(async move {
            let result = fut.await.map(|v| BusPayload::JsonResponse { data: v.to_string() });
            let _ = reply_tx.send(result);
        });
    }

    fn session_route(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let BusPayload::SessionQuery { session_id } = payload else {
            let _ = reply_tx.send(Err(BusError::invalid_params(format!("{method} expects a SessionQuery payload"))));
            return;
        };
        let cp = self.state.checkpointer.clone();
        let method = method.to_string();
        Self::spawn_json(reply_tx, async move {
            let missing = || BusError::not_found(format!("session not found: {session_id}"));
            match method.as_str() {
                "agents/sessions/detail" => {
                    let memory = cp.get_session_memory(&session_id).map_err(bus_error)?.ok_or_else(missing)?;
                    serde_json::to_value(memory).map_err(|e| BusError::internal(e.to_string()))
                }
                "agents/sessions/export" => cp.export_session(&session_id).map_err(bus_error)?.ok_or_else(missing),
                _ => {
                    if cp.clear_session_memory(&session_id).await.map_err(bus_error)? {
                        Ok(json!({ "session_id": session_id, "deleted": true }))
                    } else {
                        Err(missing())
                    }
                }
            }
        });
    }

    /// Decision, recommendation and rating methods.
    fn insight_route(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let state = self.state.clone();
        match method {
            "agents/decide" => match json_body::<DecideRequest>(method, payload) {
                Ok(req) if req.query.trim().is_empty() => {
                    let _ = reply_tx.send(Err(BusError::invalid_params("query must not be empty")));
                }
                Ok(req) => Self::spawn_json(reply_tx, async move {
                    let decision = decision::decide(&state, &req.query).await;
                    serde_json::to_value(decision).map_err(|e| BusError::internal(e.to_string()))
                }),
                Err(e) => {
                    let _ = reply_tx.send(Err(e));
                }
            },
            "agents/recommend" => match json_body::<RecommendationRequest>(method, payload) {
                Ok(req) => {
                    let recommender = self.recommender.clone();
                    Self::spawn_json(reply_tx, async move {
                        recommender.recommend(&state, req).await.map_err(BusError::invalid_params)
                    });
                }
                Err(e) => {
                    let _ = reply_tx.send(Err(e));
                }
            },
            "agents/recommend/feedback" => match json_body::<FeedbackSubmission>(method, payload) {
                Ok(sub) => Self::spawn_json(reply_tx, async move {
                    let feedback = state.feedback.submit(sub).await.map_err(bus_error)?;
                    Ok(json!({ "success": true, "message": "feedback recorded", "feedback": feedback }))
                }),
                Err(e) => {
                    let _ = reply_tx.send(Err(e));
                }
            },
            "agents/recommend/stats" => {
                let data = state.feedback.stats().to_string();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            }
            "agents/recommend/session" => {
                let result = match payload {
                    BusPayload::SessionQuery { session_id } => {
                        let feedback = state.feedback.session_feedback(&session_id);
                        let data = json!({ "session_id": session_id, "total": feedback.len(), "feedback": feedback });
                        Ok(BusPayload::JsonResponse { data: data.to_string() })
                    }
                    _ => Err(BusError::invalid_params(format!("{method} expects a SessionQuery payload"))),
                };
                let _ = reply_tx.send(result);
            }
            "agents/recommend/trends" => {
                let limit = match payload {
                    BusPayload::JsonRequest { .. } => match json_body::<TrendsRequest>(method, payload) {
                        Ok(req) => req.limit.unwrap_or(DEFAULT_TREND_WINDOW),
                        Err(e) => {
                            let _ = reply_tx.send(Err(e));
                            return;
                        }
                    },
                    _ => DEFAULT_TREND_WINDOW,
                };
                let data = state.feedback.trends(limit).to_string();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            }
            "agents/ratings/submit" => match json_body::<RatingSubmission>(method, payload) {
                Ok(sub) => Self::spawn_json(reply_tx, async move {
                    let rating = state.ratings.submit(sub).await.map_err(bus_error)?;
                    let composite = state.ratings.composite(&rating);
                    Ok(json!({ "success": true, "rating": rating, "composite_score": composite }))
                }),
                Err(e) => {
                    let _ = reply_tx.send(Err(e));
                }
            },
            "agents/ratings/stats" => {
                let data = state.ratings.stats().to_string();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            }
            _ => {
                let result = match payload {
                    BusPayload::JsonRequest { .. } => json_body::<RatingWeights>(method, payload)
                        .and_then(|w| state.ratings.update_weights(w).map_err(bus_error)),
                    _ => Ok(()),
                };
                let result = result.map(|()| BusPayload::JsonResponse {
                    data: json!({ "weights": state.ratings.weights() }).to_string(),
                });
                let _ = reply_tx.send(result);
            }
        }
    }
}

impl BusHandler for AgentsSubsystem {
    fn prefix(&self) -> &str {
        "agents"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match method {
            "agents/chat" => {
                let BusPayload::CommsMessage { channel_id, content, session_id, history } = payload else {
                    let _ = reply_tx.send(Err(BusError::invalid_params("agents/chat expects a CommsMessage payload")));
                    return;
                };
                let state = self.state.clone();
                debug!(%channel_id, content_len = content.len(), history = history.len(), "chat request");
                tokio::spawn(async move {
                    let result = chat::run(&state, &channel_id, &content, session_id, history)
                        .await
                        .map(|out| BusPayload::AgentReply {
                            metadata: out.metadata(),
                            session_id: out.session_id,
                            content: out.reply,
                        })
                        .map_err(bus_error);
                    let _ = reply_tx.send(result);
                });
            }
            "agents/task" => {
                let BusPayload::JsonRequest { data } = payload else {
                    let _ = reply_tx.send(Err(BusError::invalid_params("agents/task expects a JsonRequest payload")));
                    return;
                };
                let req: TaskRequest = match serde_json::from_str(&data) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = reply_tx.send(Err(BusError::invalid_params(format!("invalid task request: {e}"))));
                        return;
                    }
                };
                Self::spawn_json(reply_tx, run_task(self.state.clone(), self.coordinator.clone(), req));
            }
            "agents/list" => {
                let agents: Vec<_> = self.registry().all().iter().map(|a| a.metadata()).collect();
                let data = json!({ "agents": agents, "total": agents.len() }).to_string();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            }
            "agents/detail" => {
                let BusPayload::AgentQuery { agent_id } = payload else {
                    let _ = reply_tx.send(Err(BusError::invalid_params("agents/detail expects an AgentQuery payload")));
                    return;
                };
                let result = match self.registry().get(&agent_id) {
                    Some(agent) => {
                        let mut v = serde_json::to_value(agent.metadata()).unwrap_or_else(|_| json!({}));
                        v["execution_history"] = json!(agent.history());
                        Ok(BusPayload::JsonResponse { data: v.to_string() })
                    }
                    None => Err(BusError::not_found(format!("agent not found: {agent_id}"))),
                };
                let _ = reply_tx.send(result);
            }
            "agents/statistics" => {
                let data = json!(self.registry().statistics()).to_string();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            }
            "agents/sessions" => {
                let result = self
                    .state
                    .checkpointer
                    .list_sessions()
                    .map(|sessions| BusPayload::JsonResponse {
                        data: json!({ "total": sessions.len(), "sessions": sessions }).to_string(),
                    })
                    .map_err(|e| BusError::internal(e.to_string()));
                let _ = reply_tx.send(result);
            }
            "agents/sessions/detail" | "agents/sessions/export" | "agents/sessions/delete" => {
                self.session_route(method, payload, reply_tx);
            }
            "agents/decide"
            | "agents/recommend"
            | "agents/recommend/feedback"
            | "agents/recommend/stats"
            | "agents/recommend/session"
            | "agents/recommend/trends"
            | "agents/ratings/submit"
            | "agents/ratings/stats"
            | "agents/ratings/weights" => self.insight_route(method, payload, reply_tx),
            "agents/memory/stats" => {
                let result = self
                    .state
                    .checkpointer
                    .stats()
                    .map(|s| BusPayload::JsonResponse { data: json!(s).to_string() })
                    .map_err(|e| BusError::internal(e.to_string()));
                let _ = reply_tx.send(result);
            }
            "agents/memory/clear" => {
                let cp = self.state.checkpointer.clone();
                Self::spawn_json(reply_tx, async move {
                    let cleared = cp.clear_all_memory().await.map_err(|e| BusError::internal(e.to_string()))?;
                    info!(cleared, "all session memory cleared");
                    Ok(json!({ "cleared": cleared }))
                });
            }
            "agents/health" => {
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let h = match reporter {
                        Some(r) => r.get_current().await.unwrap_or_else(|| SubsystemHealth::ok("agents")),
                        None => SubsystemHealth::ok("agents"),
                    };
                    let data = serde_json::to_string(&h).unwrap_or_default();
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
                });
            }
            "agents/status" => {
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let resp = match reporter {
                        Some(r) => match r.get_current().await {
                            Some(h) if !h.healthy => ComponentStatusResponse::error("agents", h.message),
                            _ => ComponentStatusResponse::running("agents"),
                        },
                        None => ComponentStatusResponse::running("agents"),
                    };
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: resp.to_json() }));
                });
            }
            _ => reply_method_not_found(method, reply_tx),
        }
    }

    fn component_info(&self) -> ComponentInfo {
        let workers = WorkerKind::ALL
            .iter()
            .map(|k| ComponentInfo::leaf(k.id(), &ComponentInfo::capitalise(k.id())))
            .collect();
        let roles = self
            .registry()
            .all()
            .iter()
            .map(|a| ComponentInfo::leaf(&a.agent_id(), &a.name()))
            .collect();
        ComponentInfo::running(
            "agents",
            "Agents",
            vec![
                ComponentInfo::leaf("supervisor_agent", "Supervisor agent"),
                ComponentInfo::running("workers", "Workers", workers),
                ComponentInfo::running("multi_agent", "Multi-agent", roles),
            ],
        )
    }
}

// ── Test support ──────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::supervisor::bus::{ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND, ERR_NOT_FOUND};

    async fn call(s: &AgentsSubsystem, method: &str, payload: BusPayload) -> BusResult {
        let (tx, rx) = oneshot::channel();
        s.handle_request(method, payload, tx);
        rx.await.unwrap()
    }

    async fn call_json(s: &AgentsSubsystem, method: &str, payload: BusPayload) -> Value {
        match call(s, method, payload).await {
            Ok(BusPayload::JsonResponse { data }) => serde_json::from_str(&data).unwrap(),
            other => panic!("unexpected reply to {method}: {other:?}"),
        }
    }

    fn chat_message(content: &str, session_id: Option<&str>) -> BusPayload {
        BusPayload::CommsMessage {
            channel_id: "http".into(),
            content: content.into(),
            session_id: session_id.map(str::to_string),
            history: vec![],
        }
    }

    #[tokio::test]
    async fn chat_replies_with_routing_metadata() {
        let h = Harness::start([LlmResponse::text(
            r#"{"next_agent": "respond", "task_instruction": "Hi there!", "reasoning": "greeting"}"#,
        )])
        .await;
        let agents = AgentsSubsystem::new(h.state.clone());
        match call(&agents, "agents/chat", chat_message("hello", Some("chat-1"))).await {
            Ok(BusPayload::AgentReply { session_id, content, metadata }) => {
                assert_eq!(session_id, "chat-1");
                assert_eq!(content, "Hi there!");
                assert_eq!(metadata["routing"]["next_agent"], "respond");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let sessions = call_json(&agents, "agents/sessions", BusPayload::Empty).await;
        assert_eq!(sessions["total"], 1);
        let detail = call_json(&agents, "agents/sessions/detail", BusPayload::SessionQuery { session_id: "chat-1".into() }).await;
        assert_eq!(detail["session"]["message_count"], 2);
        let export = call_json(&agents, "agents/sessions/export", BusPayload::SessionQuery { session_id: "chat-1".into() }).await;
        assert_eq!(export["session"]["session_id"], "chat-1");
        let deleted = call_json(&agents, "agents/sessions/delete", BusPayload::SessionQuery { session_id: "chat-1".into() }).await;
        assert_eq!(deleted["deleted"], true);
        let err = call(&agents, "agents/sessions/detail", BusPayload::SessionQuery { session_id: "chat-1".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_NOT_FOUND);
        h.stop().await;
    }

    #[tokio::test]
    async fn task_runs_and_checkpoints_when_session_given() {
        let h = Harness::start([
            LlmResponse::text("draft"),
            LlmResponse::text(r#"{"passed": true, "score": 88}"#),
        ])
        .await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let body = json!({
            "description": "Write a status update",
            "coordination_mode": "feedback",
            "session_id": "task-1",
            "max_feedback_rounds": 2
        });
        let v = call_json(&agents, "agents/task", BusPayload::JsonRequest { data: body.to_string() }).await;
        assert_eq!(v["coordination_mode"], "feedback");
        assert_eq!(v["is_finished"], true);
        assert!(v["error"].is_null());
        assert_eq!(v["final_result"]["output"], "draft");
        assert_eq!(v["session_id"], "task-1");
        let info = h.state.checkpointer.get_session("task-1").unwrap().unwrap();
        assert_eq!(info.checkpoint_count, 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn parallel_task_accepts_a_plan() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let body = json!({
            "description": "Ship the release",
            "coordination_mode": "parallel",
            "plan": [{ "description": "write the notes", "agent_type": "executor" }]
        });
        let v = call_json(&agents, "agents/task", BusPayload::JsonRequest { data: body.to_string() }).await;
        assert_eq!(v["agents_involved"], json!(["executor_agent"]));
        assert!(v["final_result"]["output"].as_str().unwrap().starts_with("[echo] Task: write the notes"));
        h.stop().await;
    }

    #[tokio::test]
    async fn task_rejects_bad_input() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let err = call(&agents, "agents/task", BusPayload::JsonRequest { data: "not json".into() }).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        let err = call(&agents, "agents/task", BusPayload::JsonRequest { data: r#"{"description": "  "}"#.into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        let err = call(&agents, "agents/task", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        h.stop().await;
    }

    #[tokio::test]
    async fn unsafe_session_ids_are_invalid_params() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let err = call(&agents, "agents/chat", chat_message("hi", Some("../../escaped"))).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        let body = json!({ "description": "plan", "session_id": "a/b" });
        let err = call(&agents, "agents/task", BusPayload::JsonRequest { data: body.to_string() }).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        assert!(h.state.checkpointer.list_sessions().unwrap().is_empty());
        h.stop().await;
    }

    #[tokio::test]
    async fn session_lock_is_released_and_pruned() {
        let h = Harness::echo().await;
        let first = h.state.lock_session("s").await;
        let waiting = {
            let state = h.state.clone();
            tokio::spawn(async move {
                let _g = state.lock_session("s").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());
        drop(first);
        waiting.await.unwrap();
        let _other = h.state.lock_session("t").await;
        assert_eq!(h.state.session_locks.lock().unwrap().len(), 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn registry_queries() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let list = call_json(&agents, "agents/list", BusPayload::Empty).await;
        assert_eq!(list["total"], 5);
        let detail = call_json(&agents, "agents/detail", BusPayload::AgentQuery { agent_id: "planner_agent".into() }).await;
        assert_eq!(detail["agent_type"], "planner");
        assert_eq!(detail["execution_history"].as_array().unwrap().len(), 0);
        let err = call(&agents, "agents/detail", BusPayload::AgentQuery { agent_id: "ghost".into() }).await.unwrap_err();
        assert_eq!(err.code, ERR_NOT_FOUND);
        let stats = call_json(&agents, "agents/statistics", BusPayload::Empty).await;
        assert_eq!(stats["total_agents"], 5);
        assert_eq!(stats["total_capabilities"], 11);
        h.stop().await;
    }

    #[tokio::test]
    async fn memory_stats_and_clear() {
        let h = Harness::echo().await;
        h.state.checkpointer.create_session(Some("a"), json!({})).await.unwrap();
        h.state.checkpointer.create_session(Some("b"), json!({})).await.unwrap();
        let agents = AgentsSubsystem::new(h.state.clone());
        let stats = call_json(&agents, "agents/memory/stats", BusPayload::Empty).await;
        assert_eq!(stats["total_sessions"], 2);
        let cleared = call_json(&agents, "agents/memory/clear", BusPayload::Empty).await;
        assert_eq!(cleared["cleared"], 2);
        h.stop().await;
    }

    #[tokio::test]
    async fn unknown_method_and_status() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let err = call(&agents, "agents/dance", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
        let status = call_json(&agents, "agents/status", BusPayload::Empty).await;
        assert_eq!(status["status"], "running");
        let health = call_json(&agents, "agents/health", BusPayload::Empty).await;
        assert_eq!(health["healthy"], true);
        h.stop().await;
    }

    #[tokio::test]
    async fn decide_falls_back_to_keywords() {
        let h = Harness::start([LlmResponse::text("not json")]).await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let body = json!({ "query": "hello there" }).to_string();
        let v = call_json(&agents, "agents/decide", BusPayload::JsonRequest { data: body }).await;
        assert_eq!(v["decision_type"], "general_chat");
        assert_eq!(v["confidence"], 0.5);
        let err = call(&agents, "agents/decide", BusPayload::JsonRequest { data: r#"{"query": " "}"#.into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        h.stop().await;
    }

    #[tokio::test]
    async fn ratings_submit_stats_and_weights() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let body = json!({
            "session_id": "s1", "question": "q", "answer": "a",
            "accuracy_score": 100, "relevance_score": 100, "completeness_score": 100,
            "clarity_score": 100, "usefulness_score": 100
        });
        let v = call_json(&agents, "agents/ratings/submit", BusPayload::JsonRequest { data: body.to_string() }).await;
        assert_eq!(v["success"], true);
        assert!(v["rating"]["rating_id"].as_str().is_some_and(|id| !id.is_empty()));

        let bad = json!({ "session_id": "s1", "question": "q", "answer": "a", "clarity_score": 120 });
        let err = call(&agents, "agents/ratings/submit", BusPayload::JsonRequest { data: bad.to_string() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);

        let stats = call_json(&agents, "agents/ratings/stats", BusPayload::Empty).await;
        assert_eq!(stats["total_ratings"], 1);

        let weights = call_json(&agents, "agents/ratings/weights", BusPayload::Empty).await;
        assert_eq!(weights["weights"]["accuracy"], 0.3);
        let even = json!({ "accuracy": 0.2, "relevance": 0.2, "completeness": 0.2, "clarity": 0.2, "usefulness": 0.2 });
        let updated = call_json(&agents, "agents/ratings/weights", BusPayload::JsonRequest { data: even.to_string() }).await;
        assert_eq!(updated["weights"]["usefulness"], 0.2);
        let partial = json!({ "accuracy": 0.9 }).to_string();
        let err = call(&agents, "agents/ratings/weights", BusPayload::JsonRequest { data: partial }).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        assert_eq!(h.state.ratings.weights().accuracy, 0.2);
        h.stop().await;
    }

    #[tokio::test]
    async fn recommendation_feedback_methods() {
        let h = Harness::echo().await;
        let agents = AgentsSubsystem::new(h.state.clone());
        for (rec, feedback, action) in [("rec-1", "helpful", "clicked"), ("rec-2", "irrelevant", "dismissed")] {
            let body = json!({ "recommendation_id": rec, "session_id": "s1", "feedback": feedback, "user_action": action });
            let v = call_json(&agents, "agents/recommend/feedback", BusPayload::JsonRequest { data: body.to_string() }).await;
            assert_eq!(v["success"], true);
        }
        let bad = json!({ "recommendation_id": "rec-3", "session_id": "s1", "feedback": "meh", "user_action": "clicked" });
        let err = call(&agents, "agents/recommend/feedback", BusPayload::JsonRequest { data: bad.to_string() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);

        let stats = call_json(&agents, "agents/recommend/stats", BusPayload::Empty).await;
        assert_eq!(stats["total_feedback"], 2);
        assert_eq!(stats["helpful_rate"], 0.5);
        let session = call_json(&agents, "agents/recommend/session", BusPayload::SessionQuery { session_id: "s1".into() }).await;
        assert_eq!(session["total"], 2);
        let trends = call_json(&agents, "agents/recommend/trends", BusPayload::JsonRequest { data: r#"{"limit": 1}"#.into() }).await;
        assert_eq!(trends["analyzed_feedback_count"], 1);
        assert_eq!(trends["most_common_feedback"], "irrelevant");
        h.stop().await;
    }

    #[tokio::test]
    async fn recommend_method_validates_and_replies() {
        let h = Harness::start([LlmResponse::text("{}"), LlmResponse::text(r#"{"recommendations": []}"#)]).await;
        let agents = AgentsSubsystem::new(h.state.clone());
        let body = json!({ "session_id": "s1", "current_message": "How do I deploy?" });
        let v = call_json(&agents, "agents/recommend", BusPayload::JsonRequest { data: body.to_string() }).await;
        assert_eq!(v["session_id"], "s1");
        assert_eq!(v["metadata"]["recommendation_count"], 0);
        let body = json!({ "session_id": "s1", "current_message": "hi", "num_recommendations": 11 });
        let err = call(&agents, "agents/recommend", BusPayload::JsonRequest { data: body.to_string() }).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        h.stop().await;
    }

    #[test]
    fn component_tree_lists_workers_and_roles() {
        let bus = crate::supervisor::bus::SupervisorBus::new(1);
        let state = Arc::new(AgentsState::new(
            bus.handle.clone(),
            Arc::new(Checkpointer::in_memory(5)),
            AgentsConfig::test_default(),
        ));
        let info = AgentsSubsystem::new(state).component_info();
        let ids: Vec<_> = info.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["multi_agent", "supervisor_agent", "workers"]);
        let workers = info.children.iter().find(|c| c.id == "workers").unwrap();
        assert_eq!(workers.children.len(), 5);
    }
}
