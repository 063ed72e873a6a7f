//! Supervisor event bus: typed request/reply messages between subsystems.
//!
//! Every subsystem talks to every other one through a cloneable
//! [`BusHandle`].  A request carries a method string (`"agents/chat"`,
//! `"llm/chat"`, `"tools/execute"`, …), a [`BusPayload`] and a `oneshot`
//! reply slot.  The supervisor owns the receiving end and routes on the
//! first `/`-delimited method segment.
//!
//! Error codes follow JSON-RPC conventions so they map cleanly onto HTTP
//! statuses at the comms edge.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::llm::{ChatMessage, ChatRequest, LlmResponse, ToolSpec};

/// No handler (or no route inside a handler) matches the method.
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
/// Payload shape or content is not acceptable for the method.
pub const ERR_INVALID_PARAMS: i32 = -32602;
/// The handler failed while serving the request.
pub const ERR_INTERNAL: i32 = -32000;
/// The addressed entity (session, agent, document) does not exist.
pub const ERR_NOT_FOUND: i32 = -32004;

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Request and reply bodies carried on the bus.
#[derive(Debug, Clone)]
pub enum BusPayload {
    /// A user turn from a comms channel.  `history` seeds a new session
    /// (OpenAI-style clients resend the whole conversation).
    CommsMessage {
        channel_id: String,
        content: String,
        session_id: Option<String>,
        history: Vec<ChatMessage>,
    },
    /// Reply to a chat turn.  `metadata` carries the routing decision.
    AgentReply {
        session_id: String,
        content: String,
        metadata: serde_json::Value,
    },
    /// One chat-completion round-trip for the LLM subsystem.
    LlmChat(ChatRequest),
    /// Reply from the LLM subsystem.
    LlmReply(LlmResponse),
    /// Ask the tools subsystem for its tool catalogue.
    ToolList,
    /// Tool catalogue reply.
    ToolSpecs { tools: Vec<ToolSpec> },
    /// Execute a named tool with JSON arguments.
    ToolRequest {
        tool: String,
        args_json: String,
        session_id: Option<String>,
    },
    /// Tool outcome.  Tool failures are data, not bus errors.
    ToolResponse {
        tool: String,
        ok: bool,
        data_json: Option<String>,
        error: Option<String>,
    },
    /// Generic JSON body (task requests, etc.).
    JsonRequest { data: String },
    /// Generic JSON reply.
    JsonResponse { data: String },
    SessionQuery { session_id: String },
    AgentQuery { agent_id: String },
    Empty,
}

/// Structured error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub code: i32,
    pub message: String,
}

impl BusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ERR_NOT_FOUND, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, message)
    }
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

pub type BusResult = Result<BusPayload, BusError>;

/// Transport failure: the request never got a reply.
#[derive(Debug, Error)]
pub enum BusCallError {
    #[error("supervisor bus closed")]
    Send,
    #[error("reply channel dropped before a response was sent")]
    Recv,
}

// ── Messages ──────────────────────────────────────────────────────────────────

pub enum BusMessage {
    Request {
        id: Uuid,
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
    Notification {
        method: String,
        payload: BusPayload,
    },
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable sender side of the bus.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Send a request and await its reply.
    pub async fn request(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<BusResult, BusCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Request {
                id: Uuid::now_v7(),
                method: method.into(),
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| BusCallError::Send)?;
        reply_rx.await.map_err(|_| BusCallError::Recv)
    }

    /// Fire-and-forget notification.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<(), BusCallError> {
        self.tx
            .send(BusMessage::Notification { method: method.into(), payload })
            .await
            .map_err(|_| BusCallError::Send)
    }
}

/// Owns the supervisor-side receiver plus a handle to clone out.
pub struct SupervisorBus {
    pub handle: BusHandle,
    pub rx: mpsc::Receiver<BusMessage>,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { handle: BusHandle { tx }, rx }
    }
}
