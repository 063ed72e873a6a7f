//! Session and checkpoint records kept by the [`Checkpointer`](super::Checkpointer).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub metadata: Value,
    pub checkpoint_count: usize,
    /// Message count of the latest checkpoint.
    pub message_count: usize,
}

/// One saved snapshot of a conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub timestamp: String,
    pub state_keys: Vec<String>,
    pub message_count: usize,
    pub state: Value,
}

/// A checkpoint without its state body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub timestamp: String,
    pub state_keys: Vec<String>,
    pub message_count: usize,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(c: &Checkpoint) -> Self {
        Self {
            checkpoint_id: c.checkpoint_id.clone(),
            timestamp: c.timestamp.clone(),
            state_keys: c.state_keys.clone(),
            message_count: c.message_count,
        }
    }
}

/// Reply of `get_session_memory`: session info and the most recent checkpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMemory {
    pub session: SessionInfo,
    pub checkpoints: Vec<CheckpointSummary>,
    pub total_checkpoints: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_sessions: usize,
    pub total_checkpoints: usize,
    pub total_messages: usize,
    pub average_checkpoints_per_session: f64,
    pub average_messages_per_session: f64,
}

/// On-disk shape of `sessions/{id}.json`, also the export format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionInfo,
    pub checkpoints: Vec<Checkpoint>,
}
