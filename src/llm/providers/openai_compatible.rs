//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Translates [`ChatRequest`] into the OpenAI wire format, including tool
//! definitions and tool-call transcripts, and maps the first choice back to
//! an [`LlmResponse`].  Wire types are private to this module.  The provider
//! is stateless: history and the tool loop belong to the agents.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{ChatMessage, ChatRequest, LlmResponse, LlmUsage, ProviderError, ToolCall, ToolSpec};

/// Adapter for any endpoint implementing `/v1/chat/completions`
/// (OpenAI, Ollama, LM Studio, vLLM, …).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, max_tokens, api_key })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// HEAD the endpoint with a 5 s timeout.  Any HTTP status counts as
    /// reachable; only transport failures are errors.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build ping client: {e}")))?;
        let mut req = client.head(&self.api_base_url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse, ProviderError> {
        let payload = self.wire_request(request);

        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            tools = payload.tools.as_ref().map_or(0, Vec::len),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");
        into_response(parsed)
    }

    fn wire_request(&self, request: &ChatRequest) -> ChatCompletionRequest {
        // gpt-5 family models reject an explicit temperature.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(request.temperature.unwrap_or(self.temperature))
        };
        let tools = (!request.tools.is_empty())
            .then(|| request.tools.iter().map(WireTool::from).collect());

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            tools,
        }
    }
}

fn into_response(parsed: ChatCompletionResponse) -> Result<LlmResponse, ProviderError> {
    let usage = parsed.usage.map(|u| LlmUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cached_input_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
    });

    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ProviderError::Request("response has no choices".into()))?;

    let text = message.content.map(|s| s.trim().to_string()).unwrap_or_default();
    let tool_calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall { id: c.id, name: c.function.name, arguments: c.function.arguments })
        .collect();

    if text.is_empty() && tool_calls.is_empty() {
        return Err(ProviderError::Request("empty or missing content in response".into()));
    }
    Ok(LlmResponse { text, tool_calls, usage })
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        let tool_calls = (!m.tool_calls.is_empty()).then(|| {
            m.tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function".into(),
                    function: WireFunctionCall { name: c.name.clone(), arguments: c.arguments.clone() },
                })
                .collect()
        });
        // Assistant turns that only call tools carry `content: null`.
        let content = if m.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(m.content.clone())
        };
        Self {
            role: m.role.clone(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
            name: m.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(t: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Pass successful responses through; turn error statuses into a readable error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = error_message(status, &body);
    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let code = env
                .error
                .code
                .map(|v| match v {
                    serde_json::Value::String(s) => format!(" [code={s}]"),
                    other => format!(" [code={other}]"),
                })
                .unwrap_or_default();
            format!("HTTP {status}{code}: {}", env.error.message)
        }
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "http://localhost:0/v1/chat/completions".into(),
            model.into(),
            0.7,
            2000,
            5,
            None,
        )
        .unwrap()
    }

    #[test]
    fn request_uses_overrides_and_tools() {
        let req = ChatRequest::new(vec![ChatMessage::user("2+2?")])
            .with_temperature(0.1)
            .with_tools(vec![ToolSpec {
                name: "calculator".into(),
                description: "math".into(),
                parameters: serde_json::json!({ "type": "object" }),
            }]);
        let v = serde_json::to_value(provider("gpt-4o").wire_request(&req)).unwrap();
        assert!((v["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(v["max_tokens"], 2000);
        assert_eq!(v["tools"][0]["type"], "function");
        assert_eq!(v["tools"][0]["function"]["name"], "calculator");
    }

    #[test]
    fn gpt5_omits_temperature_and_no_tools_key() {
        let req = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let v = serde_json::to_value(provider("gpt-5-mini").wire_request(&req)).unwrap();
        assert!(v.get("temperature").is_none());
        assert!(v.get("tools").is_none());
    }

    #[test]
    fn tool_call_transcript_wire_shape() {
        let call = ToolCall { id: "c1".into(), name: "calculator".into(), arguments: "{\"expression\":\"1+1\"}".into() };
        let req = ChatRequest::new(vec![
            ChatMessage::assistant_tool_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "2"),
        ]);
        let v = serde_json::to_value(provider("gpt-4o").wire_request(&req)).unwrap();
        assert!(v["messages"][0]["content"].is_null());
        assert_eq!(v["messages"][0]["tool_calls"][0]["function"]["name"], "calculator");
        assert_eq!(v["messages"][1]["tool_call_id"], "c1");
    }

    #[test]
    fn response_with_tool_calls_and_usage() {
        let parsed: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{ "id": "c9", "type": "function",
                    "function": { "name": "get_current_time", "arguments": "{}" } }]
            }}],
            "usage": { "prompt_tokens": 10, "completion_tokens": 3,
                       "prompt_tokens_details": { "cached_tokens": 4 } }
        }))
        .unwrap();
        let r = into_response(parsed).unwrap();
        assert_eq!(r.text, "");
        assert_eq!(r.tool_calls[0].name, "get_current_time");
        assert_eq!(r.usage.unwrap().cached_input_tokens, 4);
    }

    #[test]
    fn empty_response_is_error() {
        let parsed: ChatCompletionResponse =
            serde_json::from_value(serde_json::json!({ "choices": [{ "message": { "content": "  " } }] })).unwrap();
        assert!(into_response(parsed).is_err());
    }

    #[test]
    fn error_envelope_formats_code() {
        let body = r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#;
        let msg = error_message(reqwest::StatusCode::UNAUTHORIZED, body);
        assert_eq!(msg, "HTTP 401 Unauthorized [code=invalid_api_key]: bad key");
        let raw = error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(raw, "HTTP 502 Bad Gateway: upstream down");
    }
}
