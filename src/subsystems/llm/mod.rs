//! LLM subsystem: serves `llm/*` bus requests with the configured provider.
//!
//! | Method       | Payload        | Reply                          |
//! |--------------|----------------|--------------------------------|
//! | `llm/chat`   | `LlmChat`      | `LlmReply`                     |
//! | `llm/health` | any            | `JsonResponse` (live ping)     |
//! | `llm/status` | any            | `JsonResponse` (cached health) |
//!
//! Every request resolves in a spawned task so the supervisor loop never
//! waits on the network.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::providers;
use crate::llm::{LlmProvider, ModelRates, ProviderError};
use crate::supervisor::bus::{BusError, BusPayload, BusResult};
use crate::supervisor::component_info::{ComponentInfo, ComponentStatusResponse};
use crate::supervisor::dispatch::{BusHandler, reply_method_not_found};
use crate::supervisor::health::{HealthReporter, SubsystemHealth};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct LlmSubsystem {
    provider: LlmProvider,
    model_name: String,
    rates: ModelRates,
    reporter: Option<HealthReporter>,
}

impl LlmSubsystem {
    /// `api_key` comes from `LLM_API_KEY`, never TOML.
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let provider = providers::build(config, api_key)?;
        let rates = ModelRates {
            input_per_million_usd: config.openai.input_per_million_usd,
            output_per_million_usd: config.openai.output_per_million_usd,
            cached_input_per_million_usd: config.openai.cached_input_per_million_usd,
        };
        Ok(Self::with_provider(provider, config.openai.model.clone(), rates))
    }

    pub fn with_provider(provider: LlmProvider, model_name: String, rates: ModelRates) -> Self {
        Self { provider, model_name, rates, reporter: None }
    }

    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Ping the provider now and then every minute until `shutdown`.
    /// No-op without a reporter.
    pub fn spawn_health_checker(&self, shutdown: CancellationToken) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let provider = self.provider.clone();
        let model = self.model_name.clone();
        tokio::spawn(async move {
            run_check(&provider, &model, &reporter).await;
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => run_check(&provider, &model, &reporter).await,
                }
            }
        });
    }
}

async fn run_check(provider: &LlmProvider, model: &str, reporter: &HealthReporter) {
    let details = Some(serde_json::json!({ "provider": provider.name(), "model": model }));
    match provider.ping().await {
        Ok(()) => {
            debug!(model, "llm provider reachable");
            reporter.set_healthy_with("ok", details).await;
        }
        Err(e) => {
            warn!(model, error = %e, "llm provider unreachable");
            reporter.set_unhealthy(format!("provider unreachable: {e}")).await;
        }
    }
}

impl BusHandler for LlmSubsystem {
    fn prefix(&self) -> &str {
        "llm"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match method {
            "llm/chat" => {
                let BusPayload::LlmChat(request) = payload else {
                    let _ = reply_tx.send(Err(BusError::invalid_params("llm/chat expects an LlmChat payload")));
                    return;
                };
                let provider = self.provider.clone();
                let rates = self.rates;
                debug!(messages = request.messages.len(), tools = request.tools.len(), "dispatching to llm provider");
                tokio::spawn(async move {
                    let result = provider
                        .chat(&request)
                        .await
                        .map(|resp| {
                            if let Some(u) = &resp.usage {
                                debug!(
                                    input_tokens = u.input_tokens,
                                    output_tokens = u.output_tokens,
                                    cached_tokens = u.cached_input_tokens,
                                    cost_usd = u.cost_usd(&rates),
                                    "llm usage"
                                );
                            }
                            BusPayload::LlmReply(resp)
                        })
                        .map_err(|e| BusError::internal(e.to_string()));
                    let _ = reply_tx.send(result);
                });
            }
            "llm/health" => {
                let provider = self.provider.clone();
                let model = self.model_name.clone();
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let h = match reporter {
                        Some(r) => {
                            run_check(&provider, &model, &r).await;
                            r.get_current().await.unwrap_or_else(|| SubsystemHealth::ok("llm"))
                        }
                        None => SubsystemHealth::ok("llm"),
                    };
                    let data = serde_json::to_string(&h).unwrap_or_default();
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
                });
            }
            "llm/status" => {
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let current = match reporter {
                        Some(r) => r.get_current().await,
                        None => None,
                    };
                    let resp = match current {
                        Some(h) if !h.healthy => ComponentStatusResponse::error("llm", h.message),
                        _ => ComponentStatusResponse::running("llm"),
                    };
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: resp.to_json() }));
                });
            }
            _ => reply_method_not_found(method, reply_tx),
        }
    }

    fn component_info(&self) -> ComponentInfo {
        let provider_id = self.provider.name();
        let label = format!("{} ({})", ComponentInfo::capitalise(provider_id), self.model_name);
        ComponentInfo::running("llm", "LLM", vec![ComponentInfo::leaf(provider_id, &label)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{ChatMessage, ChatRequest, LlmResponse};
    use crate::supervisor::bus::ERR_METHOD_NOT_FOUND;
    use crate::supervisor::health::HealthRegistry;

    fn subsystem(provider: DummyProvider) -> LlmSubsystem {
        LlmSubsystem::with_provider(LlmProvider::Dummy(provider), "test-model".into(), ModelRates::default())
    }

    async fn call(s: &LlmSubsystem, method: &str, payload: BusPayload) -> BusResult {
        let (tx, rx) = oneshot::channel();
        s.handle_request(method, payload, tx);
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn chat_returns_provider_reply() {
        let s = subsystem(DummyProvider::scripted([LlmResponse::text("pong")]));
        let req = ChatRequest::new(vec![ChatMessage::user("ping")]);
        match call(&s, "llm/chat", BusPayload::LlmChat(req)).await {
            Ok(BusPayload::LlmReply(r)) => assert_eq!(r.text, "pong"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_rejects_wrong_payload() {
        let s = subsystem(DummyProvider::default());
        let err = call(&s, "llm/chat", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, crate::supervisor::bus::ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn health_pings_and_records() {
        let registry = HealthRegistry::new();
        let s = subsystem(DummyProvider::default()).with_health_reporter(registry.reporter("llm"));
        match call(&s, "llm/health", BusPayload::Empty).await {
            Ok(BusPayload::JsonResponse { data }) => {
                let v: serde_json::Value = serde_json::from_str(&data).unwrap();
                assert_eq!(v["healthy"], true);
                assert_eq!(v["details"]["provider"], "dummy");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(registry.all_healthy().await);
    }

    #[tokio::test]
    async fn unknown_method_not_found() {
        let s = subsystem(DummyProvider::default());
        let err = call(&s, "llm/complete", BusPayload::Empty).await.unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }

    #[test]
    fn component_tree_names_provider() {
        let info = subsystem(DummyProvider::default()).component_info();
        assert_eq!(info.children[0].id, "dummy");
        assert_eq!(info.children[0].name, "Dummy (test-model)");
    }
}
