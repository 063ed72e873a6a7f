//! Multi-agent collaboration: role agents, their registry, and the
//! coordinator that runs a task through them.

pub mod base;
pub mod coordinator;
pub mod registry;
pub mod state;
pub mod types;

pub use base::RoleAgent;
pub use coordinator::AgentCoordinator;
pub use registry::{AgentRegistry, RegistryStatistics};
pub use state::{CoordinationMode, MultiAgentState, Subtask, TaskSpec};
pub use types::{AgentStatus, AgentType};
