//! Agent registry with type and capability indices.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{info, warn};

use super::base::RoleAgent;
use super::types::{AgentStatus, AgentType};

#[derive(Default)]
struct Inner {
    /// Registration order is the lookup order.
    agents: Vec<Arc<RoleAgent>>,
    by_type: HashMap<AgentType, Vec<String>>,
    by_capability: HashMap<String, Vec<String>>,
}

impl Inner {
    fn get(&self, id: &str) -> Option<&Arc<RoleAgent>> {
        self.agents.iter().find(|a| a.agent_id() == id)
    }

    fn unindex(&mut self, id: &str) {
        for ids in self.by_type.values_mut().chain(self.by_capability.values_mut()) {
            ids.retain(|x| x != id);
        }
        self.by_type.retain(|_, ids| !ids.is_empty());
        self.by_capability.retain(|_, ids| !ids.is_empty());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub total_capabilities: usize,
}

#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding one default agent per working role.
    pub fn with_default_roles() -> Self {
        let registry = Self::new();
        for t in [AgentType::Analyst, AgentType::Planner, AgentType::Executor, AgentType::Reviewer, AgentType::Researcher] {
            registry.register(Arc::new(RoleAgent::of_type(t)));
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Add `agent`, replacing any agent with the same id.
    pub fn register(&self, agent: Arc<RoleAgent>) {
        let id = agent.agent_id();
        let mut inner = self.write();
        if let Some(pos) = inner.agents.iter().position(|a| a.agent_id() == id) {
            warn!(agent_id = %id, "agent already registered, replacing");
            inner.agents.remove(pos);
            inner.unindex(&id);
        }
        inner.by_type.entry(agent.agent_type()).or_default().push(id.clone());
        for cap in agent.capabilities() {
            inner.by_capability.entry(cap.name).or_default().push(id.clone());
        }
        info!(agent_id = %id, agent_type = %agent.agent_type(), "agent registered");
        inner.agents.push(agent);
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        let mut inner = self.write();
        let Some(pos) = inner.agents.iter().position(|a| a.agent_id() == agent_id) else {
            warn!(%agent_id, "unregister: agent not found");
            return false;
        };
        inner.agents.remove(pos);
        inner.unindex(agent_id);
        info!(%agent_id, "agent unregistered");
        true
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<RoleAgent>> {
        self.read().get(agent_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<RoleAgent>> {
        self.read().agents.clone()
    }

    pub fn len(&self) -> usize {
        self.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn by_type(&self, agent_type: AgentType) -> Vec<Arc<RoleAgent>> {
        let inner = self.read();
        inner
            .by_type
            .get(&agent_type)
            .map(|ids| ids.iter().filter_map(|id| inner.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<Arc<RoleAgent>> {
        let inner = self.read();
        inner
            .by_capability
            .get(capability)
            .map(|ids| ids.iter().filter_map(|id| inner.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Every agent that is not offline.
    pub fn available(&self) -> Vec<Arc<RoleAgent>> {
        self.all().into_iter().filter(|a| a.status() != AgentStatus::Offline).collect()
    }

    pub fn idle(&self) -> Vec<Arc<RoleAgent>> {
        self.all().into_iter().filter(|a| a.status() == AgentStatus::Idle).collect()
    }

    /// First matching agent that is not offline; idle ones win when
    /// `prefer_idle` is set.
    pub fn find_best_agent(
        &self,
        agent_type: Option<AgentType>,
        required_capabilities: &[&str],
        prefer_idle: bool,
    ) -> Option<Arc<RoleAgent>> {
        let candidates: Vec<Arc<RoleAgent>> = self
            .all()
            .into_iter()
            .filter(|a| agent_type.is_none_or(|t| a.agent_type() == t))
            .filter(|a| required_capabilities.iter().all(|c| a.has_capability(c)))
            .filter(|a| a.status() != AgentStatus::Offline)
            .collect();
        if prefer_idle
            && let Some(idle) = candidates.iter().find(|a| a.status() == AgentStatus::Idle)
        {
            return Some(idle.clone());
        }
        candidates.into_iter().next()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let agents = self.all();
        let mut by_type = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut total_capabilities = 0;
        for a in &agents {
            let meta = a.metadata();
            *by_type.entry(meta.agent_type.as_str().to_string()).or_insert(0) += 1;
            *by_status.entry(meta.status.as_str().to_string()).or_insert(0) += 1;
            total_capabilities += meta.capabilities.len();
        }
        RegistryStatistics { total_agents: agents.len(), by_type, by_status, total_capabilities }
    }

    pub fn clear(&self) {
        *self.write() = Inner::default();
        info!("agent registry cleared");
    }
}
