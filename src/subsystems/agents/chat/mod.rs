//! Supervisor chat flow.
//!
//! ```text
//! restore state ─► supervisor ─┬─► worker ──┐
//!                              ├─► respond ─┼─► append reply ─► checkpoint
//!                              └─► finish ──┘
//! ```
//!
//! One supervisor step and at most one worker per request.  History comes
//! from, and goes back to, the checkpointer under the session id.

pub mod state;
pub mod supervisor;

use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::llm::{ChatMessage, ChatRequest};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::core::prompt;
use crate::subsystems::agents::workers;
use crate::subsystems::memory::validate_session_id;

use state::ChatState;
use supervisor::{Route, RoutingDecision};

pub const CLOSING_LINE: &str = "Thanks for chatting. Feel free to come back any time!";

/// Number of history messages used for a direct reply.
const RESPOND_HISTORY: usize = 10;

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session_id: String,
    pub reply: String,
    pub decision: RoutingDecision,
}

impl ChatOutcome {
    pub fn metadata(&self) -> serde_json::Value {
        json!({
            "agent": self.decision.next_agent.as_str(),
            "routing": self.decision.to_json(),
        })
    }
}

/// Handle one user turn.  `history` seeds a session that has no saved state.
pub async fn run(
    agents: &AgentsState,
    channel_id: &str,
    content: &str,
    session_id: Option<String>,
    history: Vec<ChatMessage>,
) -> Result<ChatOutcome, AppError> {
    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    validate_session_id(&session_id)?;
    let _turn = agents.lock_session(&session_id).await;
    let checkpointer = &agents.checkpointer;
    checkpointer.create_session(Some(&session_id), json!({ "channel": channel_id })).await?;

    let mut chat = match checkpointer.latest_state(&session_id)?.and_then(ChatState::restore) {
        Some(s) => s,
        None => {
            let mut s = ChatState::new(&session_id, agents.config.max_iterations);
            s.messages.extend(history.into_iter().filter(|m| m.role != "system"));
            s
        }
    };
    chat.max_iterations = agents.config.max_iterations;
    chat.begin_turn(content);

    let decision = if chat.iteration >= chat.max_iterations {
        warn!(session_id = %session_id, "iteration limit reached, finishing");
        RoutingDecision {
            next_agent: Route::Finish,
            task_instruction: String::new(),
            reasoning: "iteration limit reached".into(),
        }
    } else {
        chat.iteration += 1;
        supervisor::route(agents, &chat.messages).await
    };
    chat.next_agent = Some(decision.next_agent.as_str().to_string());
    chat.task_instruction = Some(decision.task_instruction.clone());

    let reply = match decision.next_agent {
        Route::Worker(kind) => {
            let out = workers::run(agents, kind, &decision.task_instruction, &chat.messages, Some(&session_id)).await;
            chat.agent_outputs.insert(kind.id().to_string(), out.clone());
            out
        }
        Route::Respond if !decision.task_instruction.trim().is_empty() => decision.task_instruction.clone(),
        Route::Respond => direct_reply(agents, &chat).await,
        Route::Finish if !decision.task_instruction.trim().is_empty() => decision.task_instruction.clone(),
        Route::Finish => chat.last_assistant().unwrap_or(CLOSING_LINE).to_string(),
    };
    chat.messages.push(ChatMessage::assistant(&reply));

    let state_json = serde_json::to_value(&chat).map_err(|e| AppError::Agent(format!("serialise chat state: {e}")))?;
    checkpointer.record_checkpoint(&session_id, state_json).await?;
    info!(
        session_id = %session_id,
        agent = decision.next_agent.as_str(),
        reply_chars = reply.len(),
        "chat turn complete"
    );

    Ok(ChatOutcome { session_id, reply, decision })
}

/// `respond` without a prepared reply: answer from the conversation.
async fn direct_reply(agents: &AgentsState, chat: &ChatState) -> String {
    let mut messages = vec![ChatMessage::system(prompt::preamble(&agents.config.prompts_dir, &[]).build())];
    messages.extend(chat.recent(RESPOND_HISTORY));
    match agents.llm_chat(ChatRequest::new(messages)).await {
        Ok(r) if !r.text.trim().is_empty() => r.text,
        Ok(_) => supervisor::APOLOGY.to_string(),
        Err(e) => {
            tracing::error!(error = %e, "direct reply failed");
            supervisor::APOLOGY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::subsystems::agents::test_support::Harness;

    fn decision(next: &str, instruction: &str) -> LlmResponse {
        LlmResponse::text(format!(
            "```json\n{{\"next_agent\": \"{next}\", \"task_instruction\": \"{instruction}\", \"reasoning\": \"test\"}}\n```"
        ))
    }

    #[tokio::test]
    async fn respond_returns_instruction_and_checkpoints() {
        let h = Harness::start([decision("respond", "Hello! How can I help?")]).await;
        let out = run(&h.state, "test", "hi", None, vec![]).await.unwrap();
        assert_eq!(out.reply, "Hello! How can I help?");
        assert_eq!(out.metadata()["agent"], "respond");

        let saved = h.state.checkpointer.latest_state(&out.session_id).unwrap().unwrap();
        let chat = ChatState::restore(saved).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.next_agent.as_deref(), Some("respond"));
        h.stop().await;
    }

    #[tokio::test]
    async fn worker_reply_is_returned_and_recorded() {
        let h = Harness::start([decision("analysis_agent", "compare a and b"), LlmResponse::text("a is better")]).await;
        let out = run(&h.state, "test", "compare a and b", Some("s-1".into()), vec![]).await.unwrap();
        assert_eq!(out.session_id, "s-1");
        assert_eq!(out.reply, "a is better");

        let chat = ChatState::restore(h.state.checkpointer.latest_state("s-1").unwrap().unwrap()).unwrap();
        assert_eq!(chat.agent_outputs.get("analysis_agent").map(String::as_str), Some("a is better"));
        h.stop().await;
    }

    #[tokio::test]
    async fn history_survives_between_turns() {
        let h = Harness::start([decision("respond", "first reply"), decision("finish", "")]).await;
        run(&h.state, "test", "hello", Some("s-2".into()), vec![]).await.unwrap();
        let out = run(&h.state, "test", "bye", Some("s-2".into()), vec![]).await.unwrap();
        // finish without text repeats the last assistant message
        assert_eq!(out.reply, "first reply");

        let info = h.state.checkpointer.get_session("s-2").unwrap().unwrap();
        assert_eq!(info.checkpoint_count, 2);
        assert_eq!(info.message_count, 4);
        h.stop().await;
    }

    #[tokio::test]
    async fn unparsable_decision_apologises() {
        let h = Harness::start([LlmResponse::text("no json here")]).await;
        let out = run(&h.state, "test", "hi", None, vec![]).await.unwrap();
        assert_eq!(out.reply, supervisor::APOLOGY);
        assert!(out.decision.reasoning.starts_with("unparsable"));
        h.stop().await;
    }

    #[tokio::test]
    async fn empty_respond_falls_back_to_llm() {
        let h = Harness::start([decision("respond", "")]).await;
        let out = run(&h.state, "test", "tell me a joke", None, vec![]).await.unwrap();
        // The dummy provider echoes the last user message.
        assert_eq!(out.reply, "[echo] tell me a joke");
        h.stop().await;
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_all_land() {
        let h = Harness::echo().await;
        let mut turns = tokio::task::JoinSet::new();
        for i in 0..6 {
            let state = h.state.clone();
            turns.spawn(async move { run(&state, "test", &format!("turn {i}"), Some("shared".into()), vec![]).await });
        }
        while let Some(res) = turns.join_next().await {
            res.unwrap().unwrap();
        }
        let chat = ChatState::restore(h.state.checkpointer.latest_state("shared").unwrap().unwrap()).unwrap();
        assert_eq!(chat.messages.len(), 12);
        assert_eq!(h.state.checkpointer.get_session("shared").unwrap().unwrap().checkpoint_count, 6);
        h.stop().await;
    }

    #[tokio::test]
    async fn traversal_session_id_is_rejected() {
        let h = Harness::echo().await;
        let err = run(&h.state, "test", "hi", Some("../../escaped".into()), vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        h.stop().await;
    }

    #[tokio::test]
    async fn seed_history_used_for_new_session() {
        let h = Harness::start([decision("finish", "")]).await;
        let seed = vec![ChatMessage::system("ignored"), ChatMessage::user("q"), ChatMessage::assistant("earlier answer")];
        let out = run(&h.state, "openai", "thanks", None, seed).await.unwrap();
        assert_eq!(out.reply, "earlier answer");
        h.stop().await;
    }
}
