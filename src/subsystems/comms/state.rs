//! Shared state for the comms subsystem: capability boundary for channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below.  The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods or supervisor internals.

use serde_json::Value;
use thiserror::Error;

use crate::llm::ChatMessage;
use crate::supervisor::bus::{BusCallError, BusError, BusHandle, BusPayload};

#[derive(Debug, Clone)]
pub struct CommsReply {
    pub reply: String,
    pub session_id: String,
    pub metadata: Value,
}

#[derive(Debug, Error)]
pub enum CommsError {
    #[error("bus transport error: {0}")]
    Transport(#[from] BusCallError),
    /// The handling subsystem replied with an error.
    #[error("{0}")]
    Bus(BusError),
    #[error("unexpected reply payload from {0}")]
    UnexpectedReply(String),
    #[error("invalid JSON reply: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared state passed as `Arc<CommsState>` to every channel task.
pub struct CommsState {
    bus: BusHandle,
}

impl CommsState {
    pub fn new(bus: BusHandle) -> Self {
        Self { bus }
    }

    /// Send one user turn to the chat flow and await the reply.
    ///
    /// `history` only matters for a session with no saved state.
    pub async fn send_message(
        &self,
        channel_id: &str,
        content: String,
        session_id: Option<String>,
        history: Vec<ChatMessage>,
    ) -> Result<CommsReply, CommsError> {
        let payload = BusPayload::CommsMessage { channel_id: channel_id.to_string(), content, session_id, history };
        match self.bus.request("agents/chat", payload).await? {
            Ok(BusPayload::AgentReply { session_id, content, metadata }) => {
                Ok(CommsReply { reply: content, session_id, metadata })
            }
            Ok(_) => Err(CommsError::UnexpectedReply("agents/chat".into())),
            Err(e) => Err(CommsError::Bus(e)),
        }
    }

    /// Any request whose reply is a `JsonResponse`, parsed.
    pub async fn query(&self, method: &str, payload: BusPayload) -> Result<Value, CommsError> {
        match self.bus.request(method, payload).await? {
            Ok(BusPayload::JsonResponse { data }) => Ok(serde_json::from_str(&data)?),
            Ok(_) => Err(CommsError::UnexpectedReply(method.to_string())),
            Err(e) => Err(CommsError::Bus(e)),
        }
    }

    pub async fn health(&self) -> Result<Value, CommsError> {
        self.query("manage/health", BusPayload::Empty).await
    }

    pub async fn component_tree(&self) -> Result<Value, CommsError> {
        self.query("manage/tree", BusPayload::Empty).await
    }

    /// Run a multi-agent task; `request` is the task request body.
    pub async fn run_task(&self, request: &Value) -> Result<Value, CommsError> {
        self.query("agents/task", BusPayload::JsonRequest { data: request.to_string() }).await
    }

    pub async fn agent_detail(&self, agent_id: &str) -> Result<Value, CommsError> {
        self.query("agents/detail", BusPayload::AgentQuery { agent_id: agent_id.to_string() }).await
    }

    /// `action` is one of `detail`, `export`, `delete`.
    pub async fn session(&self, action: &str, session_id: &str) -> Result<Value, CommsError> {
        let method = format!("agents/sessions/{action}");
        self.query(&method, BusPayload::SessionQuery { session_id: session_id.to_string() }).await
    }
}
