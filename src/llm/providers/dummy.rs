//! Dummy provider: echoes the last user message, or replays a script.
//!
//! With no script every call answers `[echo] <last user message>`.  A
//! scripted provider pops queued replies in order and falls back to the
//! echo once the queue is empty, which lets tests drive routing and tool
//! loops without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::llm::{ChatRequest, LlmResponse, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    script: Arc<Mutex<VecDeque<LlmResponse>>>,
}

impl DummyProvider {
    pub fn scripted(replies: impl IntoIterator<Item = LlmResponse>) -> Self {
        Self { script: Arc::new(Mutex::new(replies.into_iter().collect())) }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse, ProviderError> {
        let next = self
            .script
            .lock()
            .map_err(|_| ProviderError::Request("dummy script lock poisoned".into()))?
            .pop_front();
        if let Some(reply) = next {
            return Ok(reply);
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(LlmResponse::text(format!("[echo] {last_user}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let p = DummyProvider::default();
        let req = ChatRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
        ]);
        let reply = p.chat(&req).await.unwrap();
        assert_eq!(reply.text, "[echo] second");
        assert!(reply.usage.is_none());
    }

    #[tokio::test]
    async fn script_replays_then_echoes() {
        let p = DummyProvider::scripted([LlmResponse::text("one"), LlmResponse::text("two")]);
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        assert_eq!(p.chat(&req).await.unwrap().text, "one");
        // Clones share the script.
        assert_eq!(p.clone().chat(&req).await.unwrap().text, "two");
        assert_eq!(p.chat(&req).await.unwrap().text, "[echo] hi");
    }
}
