//! Management subsystem: process-level health and the component tree.
//!
//! Exposes on the supervisor bus:
//! - `manage/health`: aggregated health JSON (used by HTTP `/health`).
//! - `manage/tree`: component tree JSON (used by HTTP `/api/tree`).

use std::time::Instant;

use serde_json::json;
use tokio::sync::oneshot;

use crate::supervisor::bus::{BusError, BusPayload, BusResult};
use crate::supervisor::component_info::ComponentInfo;
use crate::supervisor::dispatch::{BusHandler, reply_method_not_found};
use crate::supervisor::health::HealthRegistry;

/// Static info collected at startup and included in the health response.
#[derive(Debug, Clone)]
pub struct ManagementInfo {
    pub name: String,
    pub version: String,
    pub llm_provider: String,
    pub llm_model: String,
}

pub struct ManagementSubsystem {
    info: ManagementInfo,
    health: HealthRegistry,
    started: Instant,
    /// Nodes of every other subsystem, captured before the supervisor starts.
    components: Vec<ComponentInfo>,
}

impl ManagementSubsystem {
    pub fn new(info: ManagementInfo, health: HealthRegistry, components: Vec<ComponentInfo>) -> Self {
        Self { info, health, started: Instant::now(), components }
    }

    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn tree(&self) -> ComponentInfo {
        let mut children = self.components.clone();
        children.push(self.component_info());
        ComponentInfo::supervisor_root(self.uptime_ms(), children)
    }
}

impl BusHandler for ManagementSubsystem {
    fn prefix(&self) -> &str {
        "manage"
    }

    fn component_info(&self) -> ComponentInfo {
        ComponentInfo::leaf("manage", "Management")
    }

    fn handle_request(&self, method: &str, _payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match method {
            "manage/tree" => {
                let result = serde_json::to_string(&self.tree())
                    .map(|data| BusPayload::JsonResponse { data })
                    .map_err(|e| BusError::internal(e.to_string()));
                let _ = reply_tx.send(result);
            }
            "manage/health" => {
                let health = self.health.clone();
                let info = self.info.clone();
                let uptime_ms = self.uptime_ms();
                tokio::spawn(async move {
                    let subsystems = health.snapshot().await;
                    let status = health.overall_status().await;
                    let data = json!({
                        "status": status,
                        "name": info.name,
                        "version": info.version,
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "uptime_ms": uptime_ms,
                        "llm": { "provider": info.llm_provider, "model": info.llm_model },
                        "subsystems": subsystems,
                    });
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: data.to_string() }));
                });
            }
            _ => reply_method_not_found(method, reply_tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn subsystem(health: HealthRegistry) -> ManagementSubsystem {
        ManagementSubsystem::new(
            ManagementInfo {
                name: "test".into(),
                version: "0.1.0".into(),
                llm_provider: "dummy".into(),
                llm_model: "test-model".into(),
            },
            health,
            vec![ComponentInfo::leaf("tools", "Tools"), ComponentInfo::leaf("agents", "Agents")],
        )
    }

    async fn call(s: &ManagementSubsystem, method: &str) -> BusResult {
        let (tx, rx) = oneshot::channel();
        s.handle_request(method, BusPayload::Empty, tx);
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn tree_is_rooted_at_supervisor_and_sorted() {
        let s = subsystem(HealthRegistry::new());
        let Ok(BusPayload::JsonResponse { data }) = call(&s, "manage/tree").await else {
            panic!("expected json tree");
        };
        let v: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(v["id"], "supervisor");
        let ids: Vec<_> = v["children"].as_array().unwrap().iter().map(|c| c["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["agents", "manage", "tools"]);
    }

    #[tokio::test]
    async fn health_reflects_reporters() {
        let health = HealthRegistry::new();
        health.reporter("llm").set_unhealthy("provider unreachable").await;
        health.reporter("tools").set_healthy().await;
        let s = subsystem(health);
        let Ok(BusPayload::JsonResponse { data }) = call(&s, "manage/health").await else {
            panic!("expected json health");
        };
        let v: Value = serde_json::from_str(&data).unwrap();
        assert_ne!(v["status"], "healthy");
        assert_eq!(v["subsystems"].as_array().unwrap().len(), 2);
        assert_eq!(v["llm"]["model"], "test-model");
    }

    #[tokio::test]
    async fn unknown_method() {
        let s = subsystem(HealthRegistry::new());
        assert!(call(&s, "manage/reboot").await.is_err());
    }
}
