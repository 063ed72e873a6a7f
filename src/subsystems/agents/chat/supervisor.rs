//! Supervisor routing: one LLM call that names the next worker.
//!
//! The model answers with a JSON object (usually inside a ```` ```json ````
//! fence).  Anything that cannot be parsed degrades to `respond` with an
//! apology so the user always gets a reply.

use serde::Deserialize;
use tracing::{info, warn};

use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::json::fenced_or_raw;
use crate::subsystems::agents::core::prompt;
use crate::subsystems::agents::workers::WorkerKind;

const SUPERVISOR_TEMPERATURE: f32 = 0.2;

pub const APOLOGY: &str = "Sorry, I ran into a problem while handling your request. Please describe what you need again.";

/// Where the supervisor sends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Worker(WorkerKind),
    /// Answer directly with `task_instruction`.
    Respond,
    /// End the conversation.
    Finish,
}

impl Route {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "respond" => Some(Route::Respond),
            "finish" => Some(Route::Finish),
            other => WorkerKind::from_id(other).map(Route::Worker),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Worker(kind) => kind.id(),
            Route::Respond => "respond",
            Route::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub next_agent: Route,
    pub task_instruction: String,
    pub reasoning: String,
}

impl RoutingDecision {
    fn fallback(reasoning: impl Into<String>) -> Self {
        Self { next_agent: Route::Respond, task_instruction: APOLOGY.to_string(), reasoning: reasoning.into() }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "next_agent": self.next_agent.as_str(),
            "task_instruction": self.task_instruction,
            "reasoning": self.reasoning,
        })
    }
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    next_agent: String,
    #[serde(default)]
    task_instruction: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse model output into a decision.  Unknown targets become `respond`.
pub fn parse_decision(text: &str) -> Result<RoutingDecision, String> {
    let raw: RawDecision = serde_json::from_str(fenced_or_raw(text)).map_err(|e| e.to_string())?;
    let next_agent = match Route::parse(&raw.next_agent) {
        Some(route) => route,
        None => {
            warn!(next_agent = %raw.next_agent, "unknown routing target, responding directly");
            Route::Respond
        }
    };
    Ok(RoutingDecision { next_agent, task_instruction: raw.task_instruction, reasoning: raw.reasoning })
}

/// System prompt with the worker roster filled in.
pub fn system_prompt(state: &AgentsState) -> String {
    let workers = WorkerKind::ALL
        .iter()
        .map(|w| format!("- {}: {}", w.id(), w.description()))
        .collect::<Vec<_>>()
        .join("\n");
    prompt::preamble(&state.config.prompts_dir, &[])
        .layer("supervisor.md")
        .var("workers", workers)
        .build()
}

/// Ask the model where `conversation` should go next.
pub async fn route(state: &AgentsState, conversation: &[ChatMessage]) -> RoutingDecision {
    let mut messages = vec![ChatMessage::system(system_prompt(state))];
    messages.extend(super::state::conversation_tail(conversation, state.config.supervisor_history));
    let request = ChatRequest::new(messages).with_temperature(SUPERVISOR_TEMPERATURE);

    let text = match state.llm_chat(request).await {
        Ok(resp) => resp.text,
        Err(e) => {
            tracing::error!(error = %e, "supervisor llm call failed");
            return RoutingDecision::fallback(format!("supervisor error: {}", e.message));
        }
    };

    match parse_decision(&text) {
        Ok(decision) => {
            info!(
                next = decision.next_agent.as_str(),
                reasoning = %decision.reasoning,
                "routing decision"
            );
            decision
        }
        Err(e) => {
            warn!(error = %e, chars = text.len(), "supervisor reply is not valid JSON");
            RoutingDecision::fallback(format!("unparsable routing decision: {e}"))
        }
    }
}
