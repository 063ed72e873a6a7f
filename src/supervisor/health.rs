//! Health registry: last-known health per subsystem.
//!
//! Subsystems push state through a [`HealthReporter`] (at startup, from a
//! periodic checker, or on failure).  Readers such as the `/health`
//! endpoint take a cached [`HealthRegistry::snapshot`] and never wait on
//! subsystem I/O.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    /// Matches the subsystem's bus prefix.
    pub id: String,
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SubsystemHealth {
    pub fn ok(id: impl Into<String>) -> Self {
        Self { id: id.into(), healthy: true, message: "ok".into(), details: None }
    }

    pub fn degraded(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), healthy: false, message: message.into(), details: None }
    }
}

/// Shared map of subsystem id → last reported health.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<HashMap<String, SubsystemHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(&self, id: impl Into<String>) -> HealthReporter {
        HealthReporter { id: id.into(), registry: self.clone() }
    }

    /// All states, sorted by id.
    pub async fn snapshot(&self) -> Vec<SubsystemHealth> {
        let map = self.inner.read().await;
        let mut v: Vec<_> = map.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }

    /// `true` when nothing has reported unhealthy.
    pub async fn all_healthy(&self) -> bool {
        self.inner.read().await.values().all(|h| h.healthy)
    }

    /// `"healthy"` or `"degraded"`, as reported by the health endpoints.
    pub async fn overall_status(&self) -> &'static str {
        if self.all_healthy().await { "healthy" } else { "degraded" }
    }
}

/// Write handle for one subsystem's entry.
#[derive(Clone)]
pub struct HealthReporter {
    id: String,
    registry: HealthRegistry,
}

impl HealthReporter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn set_healthy(&self) {
        self.write(SubsystemHealth::ok(&self.id)).await;
    }

    pub async fn set_healthy_with(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        let mut h = SubsystemHealth::ok(&self.id);
        h.message = message.into();
        h.details = details;
        self.write(h).await;
    }

    pub async fn set_unhealthy(&self, message: impl Into<String>) {
        self.write(SubsystemHealth::degraded(&self.id, message)).await;
    }

    /// `None` until the subsystem reports for the first time.
    pub async fn get_current(&self) -> Option<SubsystemHealth> {
        self.registry.inner.read().await.get(&self.id).cloned()
    }

    async fn write(&self, h: SubsystemHealth) {
        self.registry.inner.write().await.insert(self.id.clone(), h);
    }
}
