//! Worker agents: role-specialised LLM calls with a shared tool loop.
//!
//! Each worker gets its own system prompt, a slice of the conversation and
//! the supervisor's instruction.  Tools are offered by name keyword; tool
//! calls go through the tools subsystem on the bus.

pub mod quality;

use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatRequest, ToolSpec};
use crate::subsystems::agents::AgentsState;
use crate::subsystems::agents::chat::state::conversation_tail;
use crate::subsystems::agents::core::prompt;
use crate::supervisor::bus::BusError;

pub const EMPTY_INSTRUCTION_REPLY: &str = "Sorry, I did not receive a concrete task. Could you tell me what you need?";
pub const FAILURE_REPLY: &str = "Sorry, something went wrong while working on your request. Please try again later.";

/// Placeholder sent to the model when a tool returns nothing.
pub const NO_RESULT: &str = "(no result)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Search,
    Write,
    Analysis,
    Execution,
    Quality,
}

impl WorkerKind {
    pub const ALL: &'static [WorkerKind] = &[
        WorkerKind::Search,
        WorkerKind::Write,
        WorkerKind::Analysis,
        WorkerKind::Execution,
        WorkerKind::Quality,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            WorkerKind::Search => "search_agent",
            WorkerKind::Write => "write_agent",
            WorkerKind::Analysis => "analysis_agent",
            WorkerKind::Execution => "execution_agent",
            WorkerKind::Quality => "quality_agent",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|w| w.id() == id)
    }

    /// One-line summary shown to the supervisor.
    pub fn description(&self) -> &'static str {
        match self {
            WorkerKind::Search => "searches the knowledge base and answers questions from it",
            WorkerKind::Write => "adds, updates and deletes knowledge base documents",
            WorkerKind::Analysis => "reasons through comparisons, data and calculations",
            WorkerKind::Execution => "runs concrete operations with tools (calculator, current time)",
            WorkerKind::Quality => "evaluates answers and improves low-quality ones",
        }
    }

    pub fn prompt_file(&self) -> String {
        format!("{}.md", self.id())
    }

    /// Conversation messages included before the instruction.
    pub fn history(&self) -> usize {
        match self {
            WorkerKind::Search | WorkerKind::Execution | WorkerKind::Quality => 5,
            WorkerKind::Write => 3,
            WorkerKind::Analysis => 8,
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            WorkerKind::Search | WorkerKind::Quality => 0.3,
            WorkerKind::Write | WorkerKind::Execution => 0.1,
            WorkerKind::Analysis => 0.5,
        }
    }

    fn tool_keywords(&self) -> &'static [&'static str] {
        match self {
            WorkerKind::Search => &["search", "query", "retrieve", "find", "lookup", "rag"],
            WorkerKind::Write => &["add", "write", "update", "delete", "remove", "insert", "upload", "create"],
            WorkerKind::Analysis => &["calculate", "compute", "analyze", "process", "compare", "evaluate"],
            WorkerKind::Execution | WorkerKind::Quality => &[],
        }
    }

    /// Pick the tools this worker may call, matching on the tool name.
    pub fn select_tools(&self, tools: Vec<ToolSpec>) -> Vec<ToolSpec> {
        match self {
            WorkerKind::Quality => Vec::new(),
            WorkerKind::Execution => tools
                .into_iter()
                .filter(|t| {
                    let name = t.name.to_lowercase();
                    !name.contains("knowledge_base") && !name.contains("rag")
                })
                .collect(),
            _ => {
                let keywords = self.tool_keywords();
                let (matched, rest): (Vec<_>, Vec<_>) = tools.into_iter().partition(|t| {
                    let name = t.name.to_lowercase();
                    keywords.iter().any(|k| name.contains(k))
                });
                if matched.is_empty() && *self == WorkerKind::Analysis { rest } else { matched }
            }
        }
    }
}

/// Run `kind` on `instruction`.  Always yields a reply; failures become an
/// apology.
pub async fn run(
    state: &AgentsState,
    kind: WorkerKind,
    instruction: &str,
    conversation: &[ChatMessage],
    session_id: Option<&str>,
) -> String {
    if instruction.trim().is_empty() {
        warn!(worker = kind.id(), "empty task instruction");
        return EMPTY_INSTRUCTION_REPLY.to_string();
    }
    info!(worker = kind.id(), chars = instruction.len(), "worker started");

    if kind == WorkerKind::Quality {
        return quality::run(state, instruction, conversation, session_id).await;
    }

    let available = match state.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            warn!(worker = kind.id(), error = %e, "tool listing failed, continuing without tools");
            Vec::new()
        }
    };
    let tools = kind.select_tools(available);
    let tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();

    let system = prompt::preamble(&state.config.prompts_dir, &tool_names)
        .layer(&kind.prompt_file())
        .build();
    let mut messages = vec![ChatMessage::system(system)];
    // The instruction replaces the latest user turn, which the supervisor
    // already folded into it.
    let mut history = conversation_tail(conversation, kind.history() + 1);
    if history.last().is_some_and(|m| m.role == "user") {
        history.pop();
    } else if history.len() > kind.history() {
        history.remove(0);
    }
    messages.extend(history);
    messages.push(ChatMessage::user(instruction));

    match tool_loop(state, messages, tools, kind.temperature(), session_id).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(worker = kind.id(), "worker produced an empty reply");
            FAILURE_REPLY.to_string()
        }
        Err(e) => {
            tracing::error!(worker = kind.id(), error = %e, "worker failed");
            FAILURE_REPLY.to_string()
        }
    }
}

/// Call the model until it stops asking for tools.  After
/// `max_tool_rounds` rounds the tools are withdrawn so the model must answer.
pub async fn tool_loop(
    state: &AgentsState,
    mut messages: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
    temperature: f32,
    session_id: Option<&str>,
) -> Result<String, BusError> {
    let max_rounds = state.config.max_tool_rounds;
    let mut round = 0usize;
    loop {
        let offer = if round < max_rounds { tools.clone() } else { Vec::new() };
        let request = ChatRequest::new(messages.clone()).with_temperature(temperature).with_tools(offer);
        let resp = state.llm_chat(request).await?;
        if resp.tool_calls.is_empty() || round >= max_rounds {
            return Ok(resp.text);
        }
        round += 1;

        messages.push(ChatMessage::assistant_tool_calls(resp.text, resp.tool_calls.clone()));
        for call in &resp.tool_calls {
            debug!(tool = %call.name, round, args_len = call.arguments.len(), "tool call");
            let content = match state
                .execute_tool(&call.name, call.arguments.clone(), session_id.map(str::to_string))
                .await
            {
                Ok(Some(data)) if !is_empty_result(&data) => data,
                Ok(_) => NO_RESULT.to_string(),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    format!("tool error: {}", e.message)
                }
            };
            messages.push(ChatMessage::tool_result(call, content));
        }
    }
}

fn is_empty_result(data: &str) -> bool {
    matches!(data.trim(), "" | "[]" | "{}" | "null" | "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, ToolCall};
    use crate::subsystems::agents::test_support::Harness;

    fn tool_spec(name: &str) -> ToolSpec {
        ToolSpec { name: name.into(), description: String::new(), parameters: serde_json::json!({}) }
    }

    fn names(tools: &[ToolSpec]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn catalogue() -> Vec<ToolSpec> {
        [
            "calculator",
            "get_current_time",
            "knowledge_base_search",
            "knowledge_base_add",
            "knowledge_base_delete",
            "knowledge_base_list",
        ]
        .iter()
        .map(|n| tool_spec(n))
        .collect()
    }

    #[test]
    fn tool_selection_per_worker() {
        assert_eq!(names(&WorkerKind::Search.select_tools(catalogue())), ["knowledge_base_search"]);
        assert_eq!(
            names(&WorkerKind::Write.select_tools(catalogue())),
            ["knowledge_base_add", "knowledge_base_delete"]
        );
        assert_eq!(names(&WorkerKind::Execution.select_tools(catalogue())), ["calculator", "get_current_time"]);
        // No analysis keyword matches a tool name, so every tool is offered.
        assert_eq!(WorkerKind::Analysis.select_tools(catalogue()).len(), 6);
        assert!(WorkerKind::Quality.select_tools(catalogue()).is_empty());
    }

    #[test]
    fn analysis_keeps_only_matches_when_present() {
        let tools = vec![tool_spec("compare_documents"), tool_spec("calculator")];
        assert_eq!(names(&WorkerKind::Analysis.select_tools(tools)), ["compare_documents"]);
    }

    #[test]
    fn ids_roundtrip() {
        for w in WorkerKind::ALL {
            assert_eq!(WorkerKind::from_id(w.id()), Some(*w));
        }
        assert_eq!(WorkerKind::from_id("respond"), None);
    }

    #[test]
    fn empty_results_detected() {
        assert!(is_empty_result("[]"));
        assert!(is_empty_result("  "));
        assert!(!is_empty_result("{\"result\":\"4\"}"));
    }

    #[tokio::test]
    async fn empty_instruction_skips_llm() {
        let h = Harness::start([LlmResponse::text("should not be used")]).await;
        let reply = run(&h.state, WorkerKind::Search, "   ", &[], None).await;
        assert_eq!(reply, EMPTY_INSTRUCTION_REPLY);
        // The scripted reply is still queued.
        let next = h.state.llm_chat(ChatRequest::new(vec![ChatMessage::user("x")])).await.unwrap();
        assert_eq!(next.text, "should not be used");
        h.stop().await;
    }

    #[tokio::test]
    async fn tool_loop_runs_calculator() {
        let call = ToolCall { id: "c1".into(), name: "calculator".into(), arguments: r#"{"expression":"6*7"}"#.into() };
        let h = Harness::start([
            LlmResponse { tool_calls: vec![call], ..LlmResponse::default() },
            LlmResponse::text("The answer is 42."),
        ])
        .await;
        let reply = run(&h.state, WorkerKind::Execution, "what is 6*7", &[], Some("s1")).await;
        assert_eq!(reply, "The answer is 42.");
        h.stop().await;
    }

    #[tokio::test]
    async fn failed_and_empty_tool_results_do_not_abort() {
        let calls = vec![
            ToolCall { id: "a".into(), name: "knowledge_base_search".into(), arguments: r#"{"query":"nothing"}"#.into() },
            ToolCall { id: "b".into(), name: "no_such_tool".into(), arguments: "{}".into() },
        ];
        let h = Harness::start([LlmResponse { tool_calls: calls, ..LlmResponse::default() }]).await;
        let messages = vec![ChatMessage::user("search please")];
        let text = tool_loop(&h.state, messages, catalogue(), 0.1, None).await.unwrap();
        assert_eq!(text, "[echo] search please");
        h.stop().await;
    }

    #[tokio::test]
    async fn tool_rounds_are_bounded() {
        let call = ToolCall { id: "c".into(), name: "get_current_time".into(), arguments: "{}".into() };
        let looping: Vec<LlmResponse> = (0..10)
            .map(|_| LlmResponse { text: "again".into(), tool_calls: vec![call.clone()], ..LlmResponse::default() })
            .collect();
        let h = Harness::start_with(looping, |c| c.max_tool_rounds = 2).await;
        let text = tool_loop(&h.state, vec![ChatMessage::user("time?")], catalogue(), 0.1, None).await.unwrap();
        // Round three is sent without tools and its text is returned as is.
        assert_eq!(text, "again");
        h.stop().await;
    }
}
