//! Tools subsystem: the callable tools offered to worker agents.
//!
//! | Method                    | Payload       | Reply          |
//! |---------------------------|---------------|----------------|
//! | `tools/list`              | any           | `ToolSpecs`    |
//! | `tools/execute`           | `ToolRequest` | `ToolResponse` |
//! | `tools/health`            | any           | `JsonResponse` |
//! | `tools/knowledge/add`     | `JsonRequest` | `JsonResponse` |
//! | `tools/knowledge/upload`  | `JsonRequest` | `JsonResponse` |
//! | `tools/knowledge/search`  | `JsonRequest` | `JsonResponse` |
//! | `tools/knowledge/stats`   | any           | `JsonResponse` |
//! | `tools/knowledge/clear`   | any           | `JsonResponse` |
//! | `tools/knowledge/formats` | any           | `JsonResponse` |
//!
//! A failing tool is reported as `ToolResponse { ok: false, error }`, not as
//! a bus error, so the calling agent can show the failure to the model.
//! The `tools/knowledge/*` methods administer the same knowledge base the
//! `knowledge_base_*` tools use, whether or not those tools are enabled.

mod calculator;
mod clock;
pub mod knowledge;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{KnowledgeBaseConfig, ToolsConfig};
use crate::llm::ToolSpec;
use crate::supervisor::bus::{BusError, BusPayload, BusResult};
use crate::supervisor::component_info::ComponentInfo;
use crate::supervisor::dispatch::{BusHandler, reply_method_not_found};
use crate::supervisor::health::{HealthReporter, SubsystemHealth};

use knowledge::KnowledgeBase;

pub const CALCULATOR: &str = "calculator";
pub const CURRENT_TIME: &str = "get_current_time";
pub const KB_SEARCH: &str = "knowledge_base_search";
pub const KB_ADD: &str = "knowledge_base_add";
pub const KB_DELETE: &str = "knowledge_base_delete";
pub const KB_LIST: &str = "knowledge_base_list";

const ALL_TOOLS: &[&str] = &[CALCULATOR, CURRENT_TIME, KB_SEARCH, KB_ADD, KB_DELETE, KB_LIST];

pub struct ToolsSubsystem {
    enabled: Vec<String>,
    kb: Arc<KnowledgeBase>,
    kb_config: KnowledgeBaseConfig,
    reporter: Option<HealthReporter>,
}

impl ToolsSubsystem {
    /// An empty `enabled` list enables every built-in tool.  Unknown names
    /// are logged and ignored.
    pub fn new(config: &ToolsConfig) -> Self {
        let enabled: Vec<String> = if config.enabled.is_empty() {
            ALL_TOOLS.iter().map(|s| s.to_string()).collect()
        } else {
            config
                .enabled
                .iter()
                .filter(|name| {
                    let known = ALL_TOOLS.contains(&name.as_str());
                    if !known {
                        warn!(tool = %name, "unknown tool in config, ignoring");
                    }
                    known
                })
                .cloned()
                .collect()
        };
        info!(tools = ?enabled, "tools enabled");
        Self {
            enabled,
            kb: Arc::new(KnowledgeBase::new()),
            kb_config: config.knowledge_base.clone(),
            reporter: None,
        }
    }

    /// Reports healthy immediately; tool failures surface per call.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        let r = reporter.clone();
        tokio::spawn(async move { r.set_healthy().await });
        self.reporter = Some(reporter);
        self
    }

    pub fn knowledge_base(&self) -> Arc<KnowledgeBase> {
        self.kb.clone()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.enabled.iter().filter_map(|name| spec_for(name)).collect()
    }
}

fn spec_for(name: &str) -> Option<ToolSpec> {
    let (description, parameters) = match name {
        CALCULATOR => (
            "Evaluate an arithmetic expression. Supports + - * / % ^ and parentheses.",
            json!({
                "type": "object",
                "properties": { "expression": { "type": "string", "description": "e.g. (2 + 3) * 4" } },
                "required": ["expression"]
            }),
        ),
        CURRENT_TIME => (
            "Get the current date and time (UTC and local).",
            json!({
                "type": "object",
                "properties": { "format": { "type": "string", "description": "optional strftime format" } }
            }),
        ),
        KB_SEARCH => (
            "Search the knowledge base for documents relevant to a query.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }),
        ),
        KB_ADD => (
            "Add a document to the knowledge base.",
            json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "title": { "type": "string" },
                    "source": { "type": "string" }
                },
                "required": ["content"]
            }),
        ),
        KB_DELETE => (
            "Delete a knowledge base document by id.",
            json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        ),
        KB_LIST => (
            "List knowledge base documents (id and title).",
            json!({ "type": "object", "properties": {} }),
        ),
        _ => return None,
    };
    Some(ToolSpec { name: name.to_string(), description: description.to_string(), parameters })
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn required<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    str_arg(args, key).ok_or_else(|| format!("missing required argument: {key}"))
}

/// Run one tool to completion.
fn execute(kb: &KnowledgeBase, kb_config: &KnowledgeBaseConfig, tool: &str, args_json: &str) -> Result<Value, String> {
    let args: Value = if args_json.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(args_json).map_err(|e| format!("invalid arguments JSON: {e}"))?
    };

    match tool {
        CALCULATOR => {
            let expression = required(&args, "expression")?;
            let result = calculator::evaluate(expression)?;
            Ok(json!({ "expression": expression, "result": calculator::format_number(result) }))
        }
        CURRENT_TIME => clock::current_time(str_arg(&args, "format")),
        KB_SEARCH => {
            let query = required(&args, "query")?;
            let max_results = args
                .get("max_results")
                .and_then(Value::as_u64)
                .map_or(kb_config.max_results, |n| n.max(1) as usize);
            let hits = kb.search(query, max_results, kb_config.min_score)?;
            Ok(Value::Array(
                hits.into_iter()
                    .map(|h| {
                        json!({
                            "id": h.document.id,
                            "title": h.document.metadata.file_name,
                            "source": h.document.metadata.source,
                            "content": h.document.content,
                            "score": h.score,
                        })
                    })
                    .collect(),
            ))
        }
        KB_ADD => {
            let content = required(&args, "content")?;
            let id = kb.add(
                content,
                str_arg(&args, "title").map(str::to_string),
                str_arg(&args, "source").map(str::to_string),
            )?;
            Ok(json!({ "id": id, "added": true }))
        }
        KB_DELETE => {
            let id = required(&args, "id")?;
            if kb.delete(id)? {
                Ok(json!({ "id": id, "deleted": true }))
            } else {
                Err(format!("document not found: {id}"))
            }
        }
        KB_LIST => Ok(serde_json::to_value(kb.list()?).map_err(|e| e.to_string())?),
        other => Err(format!("unknown tool: {other}")),
    }
}

impl BusHandler for ToolsSubsystem {
    fn prefix(&self) -> &str {
        "tools"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match method {
            "tools/list" => {
                let _ = reply_tx.send(Ok(BusPayload::ToolSpecs { tools: self.specs() }));
            }
            "tools/health" => {
                let reporter = self.reporter.clone();
                let docs = self.kb.len();
                tokio::spawn(async move {
                    let mut h = match reporter {
                        Some(r) => r.get_current().await.unwrap_or_else(|| SubsystemHealth::ok("tools")),
                        None => SubsystemHealth::ok("tools"),
                    };
                    h.details = Some(json!({ "knowledge_base_documents": docs }));
                    let data = serde_json::to_string(&h).unwrap_or_default();
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
                });
            }
            "tools/execute" => {
                let BusPayload::ToolRequest { tool, args_json, session_id } = payload else {
                    let _ = reply_tx.send(Err(BusError::invalid_params("expected ToolRequest payload")));
                    return;
                };
                if !self.enabled.iter().any(|t| *t == tool) {
                    let _ = reply_tx.send(Ok(BusPayload::ToolResponse {
                        error: Some(format!("tool not available: {tool}")),
                        tool,
                        ok: false,
                        data_json: None,
                    }));
                    return;
                }
                let kb = self.kb.clone();
                let kb_config = self.kb_config.clone();
                debug!(%tool, session_id = ?session_id, args_len = args_json.len(), "executing tool");
                tokio::spawn(async move {
                    let response = match execute(&kb, &kb_config, &tool, &args_json) {
                        Ok(v) => BusPayload::ToolResponse {
                            tool,
                            ok: true,
                            data_json: Some(v.to_string()),
                            error: None,
                        },
                        Err(e) => {
                            warn!(%tool, error = %e, "tool failed");
                            BusPayload::ToolResponse { tool, ok: false, data_json: None, error: Some(e) }
                        }
                    };
                    let _ = reply_tx.send(Ok(response));
                });
            }
            "tools/knowledge/add"
            | "tools/knowledge/upload"
            | "tools/knowledge/search"
            | "tools/knowledge/stats"
            | "tools/knowledge/clear"
            | "tools/knowledge/formats" => {
                let data = match payload {
                    BusPayload::JsonRequest { data } => Some(data),
                    _ => None,
                };
                let kb = self.kb.clone();
                let kb_config = self.kb_config.clone();
                let method = method.to_string();
                tokio::spawn(async move {
                    let result = knowledge::manage::handle(&kb, &kb_config, &method, data.as_deref())
                        .map(|v| BusPayload::JsonResponse { data: v.to_string() });
                    let _ = reply_tx.send(result);
                });
            }
            _ => reply_method_not_found(method, reply_tx),
        }
    }

    fn component_info(&self) -> ComponentInfo {
        let children = self
            .enabled
            .iter()
            .map(|t| ComponentInfo::leaf(t, &ComponentInfo::capitalise(t)))
            .collect();
        ComponentInfo::running("tools", "Tools", children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: &[&str]) -> ToolsConfig {
        ToolsConfig {
            enabled: enabled.iter().map(|s| s.to_string()).collect(),
            knowledge_base: KnowledgeBaseConfig { max_results: 5, min_score: 0.3 },
        }
    }

    async fn call(s: &ToolsSubsystem, method: &str, payload: BusPayload) -> BusResult {
        let (tx, rx) = oneshot::channel();
        s.handle_request(method, payload, tx);
        rx.await.unwrap()
    }

    fn request(tool: &str, args: Value) -> BusPayload {
        BusPayload::ToolRequest { tool: tool.into(), args_json: args.to_string(), session_id: None }
    }

    #[tokio::test]
    async fn empty_config_enables_everything() {
        let s = ToolsSubsystem::new(&config(&[]));
        match call(&s, "tools/list", BusPayload::Empty).await {
            Ok(BusPayload::ToolSpecs { tools }) => assert_eq!(tools.len(), ALL_TOOLS.len()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_names_are_dropped() {
        let s = ToolsSubsystem::new(&config(&["calculator", "shell"]));
        let names: Vec<_> = s.specs().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["calculator"]);
    }

    #[tokio::test]
    async fn calculator_executes() {
        let s = ToolsSubsystem::new(&config(&[]));
        match call(&s, "tools/execute", request(CALCULATOR, json!({ "expression": "(1 + 2) * 3" }))).await {
            Ok(BusPayload::ToolResponse { ok: true, data_json: Some(d), .. }) => {
                let v: Value = serde_json::from_str(&d).unwrap();
                assert_eq!(v["result"], "9");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_failure_is_data_not_bus_error() {
        let s = ToolsSubsystem::new(&config(&[]));
        match call(&s, "tools/execute", request(CALCULATOR, json!({}))).await {
            Ok(BusPayload::ToolResponse { ok: false, error: Some(e), .. }) => {
                assert!(e.contains("expression"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_tool_is_refused() {
        let s = ToolsSubsystem::new(&config(&[CALCULATOR]));
        match call(&s, "tools/execute", request(KB_LIST, json!({}))).await {
            Ok(BusPayload::ToolResponse { ok: false, error: Some(e), .. }) => assert!(e.contains("not available")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn knowledge_base_round_trip_through_bus() {
        let s = ToolsSubsystem::new(&config(&[]));
        let added = call(
            &s,
            "tools/execute",
            request(KB_ADD, json!({ "content": "The deploy guide covers server installation steps.", "title": "deploy" })),
        )
        .await;
        assert!(matches!(added, Ok(BusPayload::ToolResponse { ok: true, .. })));

        match call(&s, "tools/execute", request(KB_SEARCH, json!({ "query": "server installation" }))).await {
            Ok(BusPayload::ToolResponse { ok: true, data_json: Some(d), .. }) => {
                let v: Value = serde_json::from_str(&d).unwrap();
                assert_eq!(v[0]["title"], "deploy");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(s.knowledge_base().len(), 1);
    }

    #[tokio::test]
    async fn knowledge_admin_shares_the_tool_knowledge_base() {
        let s = ToolsSubsystem::new(&config(&[CALCULATOR]));
        let body = json!({ "filename": "ops.txt", "content": "Rotate the API keys every quarter." });
        match call(&s, "tools/knowledge/upload", BusPayload::JsonRequest { data: body.to_string() }).await {
            Ok(BusPayload::JsonResponse { data }) => {
                let v: Value = serde_json::from_str(&data).unwrap();
                assert_eq!(v["chunk_count"], 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(s.knowledge_base().len(), 1);
        match call(&s, "tools/knowledge/clear", BusPayload::Empty).await {
            Ok(BusPayload::JsonResponse { data }) => assert!(data.contains("\"cleared\":1")),
            other => panic!("unexpected: {other:?}"),
        }
        let err = call(&s, "tools/knowledge/search", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, crate::supervisor::bus::ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn wrong_payload_is_invalid_params() {
        let s = ToolsSubsystem::new(&config(&[]));
        let err = call(&s, "tools/execute", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, crate::supervisor::bus::ERR_INVALID_PARAMS);
    }
}
