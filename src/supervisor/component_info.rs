//! Component tree nodes reported by subsystems for `/api/tree`.

use serde::{Deserialize, Serialize};

/// Operational state of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    On,
    Off,
    Err,
}

/// One node of the runtime component tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Stable identifier, e.g. `"agents"`, `"search_agent"`, `"calculator"`.
    pub id: String,
    pub name: String,
    /// `"running"`, `"stopped"` or an error message.
    pub status: String,
    pub state: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
    /// Sorted by id.
    pub children: Vec<ComponentInfo>,
}

impl ComponentInfo {
    pub fn running(id: &str, name: &str, mut children: Vec<ComponentInfo>) -> Self {
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: "running".to_string(),
            state: ComponentStatus::On,
            uptime_ms: None,
            children,
        }
    }

    pub fn leaf(id: &str, name: &str) -> Self {
        Self::running(id, name, vec![])
    }

    /// Turn an id like `"knowledge_base_search"` into `"Knowledge base search"`.
    pub fn capitalise(s: &str) -> String {
        let s = s.replace('_', " ");
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        }
    }

    /// Root node for the whole process.
    pub fn supervisor_root(uptime_ms: u64, children: Vec<ComponentInfo>) -> Self {
        let mut root = Self::running("supervisor", "Supervisor", children);
        root.uptime_ms = Some(uptime_ms);
        root
    }
}

/// Reply body for `{prefix}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatusResponse {
    pub id: String,
    pub status: String,
    pub state: ComponentStatus,
}

impl ComponentStatusResponse {
    pub fn running(id: impl Into<String>) -> Self {
        Self { id: id.into(), status: "running".to_string(), state: ComponentStatus::On }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), status: message.into(), state: ComponentStatus::Err }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_sorted_on_construction() {
        let node = ComponentInfo::running(
            "tools",
            "Tools",
            vec![ComponentInfo::leaf("calculator", "Calculator"), ComponentInfo::leaf("a", "A")],
        );
        let ids: Vec<_> = node.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "calculator"]);
    }

    #[test]
    fn capitalise_replaces_underscores() {
        assert_eq!(ComponentInfo::capitalise("knowledge_base_search"), "Knowledge base search");
        assert_eq!(ComponentInfo::capitalise(""), "");
    }

    #[test]
    fn root_serialises_uptime_and_lowercase_state() {
        let root = ComponentInfo::supervisor_root(42, vec![]);
        let v = serde_json::to_value(&root).unwrap();
        assert_eq!(v["uptime_ms"], 42);
        assert_eq!(v["state"], "on");
        let leaf = serde_json::to_value(ComponentInfo::leaf("x", "X")).unwrap();
        assert!(leaf.get("uptime_ms").is_none());
    }
}
