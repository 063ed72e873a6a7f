//! Memory: per-session conversation checkpoints.
//!
//! The [`Checkpointer`] stores a bounded list of state snapshots per session
//! and restores the newest one when a conversation continues.  With
//! persistence enabled each session is mirrored to disk:
//!
//! ```text
//! {work_dir}/
//! └── memory/
//!     └── sessions/
//!         └── {session_id}.json
//! ```
//!
//! Files are written on the blocking pool after every mutation and loaded
//! back by [`Checkpointer::open`].
//!
//! Answer ratings ([`RatingManager`]) and recommendation feedback
//! ([`FeedbackManager`]) are append-only JSON Lines logs under
//! `{work_dir}/data/`.

pub mod feedback;
mod jsonl;
pub mod ratings;
pub mod types;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::AppError;
pub use feedback::{FeedbackManager, FeedbackSubmission, FeedbackType, RecommendationFeedback, UserAction};
pub use ratings::{AnswerRating, RatingManager, RatingSubmission};
pub use types::{Checkpoint, CheckpointSummary, MemoryStats, SessionInfo, SessionMemory, SessionRecord};

/// Checkpoints returned by [`Checkpointer::get_session_memory`].
const RECENT_CHECKPOINTS: usize = 10;

const MAX_SESSION_ID_LEN: usize = 128;

/// Session ids name files on disk: 1 to 128 ASCII letters, digits, `-` or `_`.
/// UUIDs in hyphenated form qualify.
pub fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "session id must be 1-{MAX_SESSION_ID_LEN} characters of [A-Za-z0-9_-]"
        )))
    }
}

pub struct Checkpointer {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    max_checkpoints: usize,
    sessions_dir: Option<PathBuf>,
}

impl Checkpointer {
    /// Purely in-memory checkpointer.
    pub fn in_memory(max_checkpoints: usize) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), max_checkpoints: max_checkpoints.max(1), sessions_dir: None }
    }

    /// Open the checkpointer for `work_dir`, loading persisted sessions when
    /// `config.persist` is set.  Unreadable session files are skipped.
    pub fn open(work_dir: &Path, config: &MemoryConfig) -> Result<Self, AppError> {
        let mut cp = Self::in_memory(config.max_checkpoints_per_session);
        if !config.persist {
            info!("checkpointer ready (in-memory)");
            return Ok(cp);
        }

        let dir = work_dir.join("memory").join("sessions");
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", dir.display())))?;

        let mut loaded = HashMap::new();
        let entries = fs::read_dir(&dir)
            .map_err(|e| AppError::Memory(format!("cannot read {}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).map(|s| serde_json::from_str::<SessionRecord>(&s)) {
                Ok(Ok(record)) if validate_session_id(&record.session.session_id).is_err() => {
                    warn!(path = %path.display(), "skipping session file with invalid id");
                }
                Ok(Ok(record)) => {
                    loaded.insert(record.session.session_id.clone(), record);
                }
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "skipping malformed session file"),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
            }
        }

        info!(dir = %dir.display(), sessions = loaded.len(), "checkpointer ready (persistent)");
        cp.sessions = Mutex::new(loaded);
        cp.sessions_dir = Some(dir);
        Ok(cp)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionRecord>>, AppError> {
        self.sessions.lock().map_err(|_| AppError::Memory("checkpointer lock poisoned".into()))
    }

    /// Create a session, or return the existing one with that id.
    /// A `None` id gets a fresh UUID.
    pub async fn create_session(&self, session_id: Option<&str>, metadata: Value) -> Result<SessionInfo, AppError> {
        let id = session_id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        validate_session_id(&id)?;
        let (info, snapshot) = {
            let mut sessions = self.lock()?;
            if let Some(existing) = sessions.get(&id) {
                return Ok(existing.session.clone());
            }
            let now = now();
            let record = SessionRecord {
                session: SessionInfo {
                    session_id: id.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                    metadata,
                    checkpoint_count: 0,
                    message_count: 0,
                },
                checkpoints: Vec::new(),
            };
            let info = record.session.clone();
            let snapshot = self.sessions_dir.is_some().then(|| record.clone());
            sessions.insert(id.clone(), record);
            (info, snapshot)
        };
        info!(session_id = %id, "session created");
        self.persist(&id, snapshot).await?;
        Ok(info)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, AppError> {
        Ok(self.lock()?.get(session_id).map(|r| r.session.clone()))
    }

    /// Most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, AppError> {
        let mut list: Vec<SessionInfo> = self.lock()?.values().map(|r| r.session.clone()).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.session_id.cmp(&b.session_id)));
        Ok(list)
    }

    /// Append a snapshot of `state`, creating the session if needed.  The
    /// oldest checkpoints are dropped beyond the per-session cap.
    pub async fn record_checkpoint(&self, session_id: &str, state: Value) -> Result<CheckpointSummary, AppError> {
        validate_session_id(session_id)?;
        let state_keys: Vec<String> = state.as_object().map(|o| o.keys().cloned().collect()).unwrap_or_default();
        let message_count = state.get("messages").and_then(Value::as_array).map_or(0, Vec::len);
        let checkpoint = Checkpoint {
            checkpoint_id: uuid::Uuid::now_v7().to_string(),
            timestamp: now(),
            state_keys,
            message_count,
            state,
        };
        let summary = CheckpointSummary::from(&checkpoint);

        let snapshot = {
            let mut sessions = self.lock()?;
            let record = sessions.entry(session_id.to_string()).or_insert_with(|| SessionRecord {
                session: SessionInfo {
                    session_id: session_id.to_string(),
                    created_at: checkpoint.timestamp.clone(),
                    updated_at: checkpoint.timestamp.clone(),
                    metadata: Value::Object(Default::default()),
                    checkpoint_count: 0,
                    message_count: 0,
                },
                checkpoints: Vec::new(),
            });
            record.session.updated_at = checkpoint.timestamp.clone();
            record.session.message_count = message_count;
            record.checkpoints.push(checkpoint);
            if record.checkpoints.len() > self.max_checkpoints {
                let excess = record.checkpoints.len() - self.max_checkpoints;
                record.checkpoints.drain(..excess);
            }
            record.session.checkpoint_count = record.checkpoints.len();
            self.sessions_dir.is_some().then(|| record.clone())
        };

        debug!(%session_id, checkpoint_id = %summary.checkpoint_id, message_count, "checkpoint recorded");
        self.persist(session_id, snapshot).await?;
        Ok(summary)
    }

    /// State of the newest checkpoint.
    pub fn latest_state(&self, session_id: &str) -> Result<Option<Value>, AppError> {
        Ok(self
            .lock()?
            .get(session_id)
            .and_then(|r| r.checkpoints.last())
            .map(|c| c.state.clone()))
    }

    pub fn get_session_memory(&self, session_id: &str) -> Result<Option<SessionMemory>, AppError> {
        let sessions = self.lock()?;
        Ok(sessions.get(session_id).map(|r| {
            let skip = r.checkpoints.len().saturating_sub(RECENT_CHECKPOINTS);
            SessionMemory {
                session: r.session.clone(),
                checkpoints: r.checkpoints[skip..].iter().map(CheckpointSummary::from).collect(),
                total_checkpoints: r.checkpoints.len(),
            }
        }))
    }

    /// `false` when the session did not exist.
    pub async fn clear_session_memory(&self, session_id: &str) -> Result<bool, AppError> {
        if validate_session_id(session_id).is_err() {
            return Ok(false);
        }
        let removed = self.lock()?.remove(session_id).is_some();
        if removed {
            info!(%session_id, "session memory cleared");
            if let Some(dir) = &self.sessions_dir {
                let path = dir.join(format!("{session_id}.json"));
                blocking(move || match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(AppError::Memory(format!("cannot remove {}: {e}", path.display()))),
                })
                .await?;
            }
        }
        Ok(removed)
    }

    /// Remove every session; returns how many there were.
    pub async fn clear_all_memory(&self) -> Result<usize, AppError> {
        let ids: Vec<String> = self.lock()?.keys().cloned().collect();
        let mut cleared = 0;
        for id in ids {
            if self.clear_session_memory(&id).await? {
                cleared += 1;
            }
        }
        info!(cleared, "all session memory cleared");
        Ok(cleared)
    }

    pub fn stats(&self) -> Result<MemoryStats, AppError> {
        let sessions = self.lock()?;
        let total_sessions = sessions.len();
        let total_checkpoints: usize = sessions.values().map(|r| r.checkpoints.len()).sum();
        let total_messages: usize = sessions.values().map(|r| r.session.message_count).sum();
        let avg = |n: usize| if total_sessions == 0 { 0.0 } else { n as f64 / total_sessions as f64 };
        Ok(MemoryStats {
            total_sessions,
            total_checkpoints,
            total_messages,
            average_checkpoints_per_session: avg(total_checkpoints),
            average_messages_per_session: avg(total_messages),
        })
    }

    /// Full session dump including every checkpoint state.
    pub fn export_session(&self, session_id: &str) -> Result<Option<Value>, AppError> {
        let sessions = self.lock()?;
        let Some(record) = sessions.get(session_id) else {
            return Ok(None);
        };
        let mut export = serde_json::to_value(record)
            .map_err(|e| AppError::Memory(format!("serialise session {session_id}: {e}")))?;
        if let Some(obj) = export.as_object_mut() {
            obj.insert("session_id".into(), Value::String(session_id.to_string()));
            obj.insert("exported_at".into(), Value::String(now()));
        }
        Ok(Some(export))
    }

    async fn persist(&self, session_id: &str, snapshot: Option<SessionRecord>) -> Result<(), AppError> {
        let (Some(dir), Some(record)) = (self.sessions_dir.clone(), snapshot) else {
            return Ok(());
        };
        let path = dir.join(format!("{session_id}.json"));
        blocking(move || {
            let data = serde_json::to_string_pretty(&record)
                .map_err(|e| AppError::Memory(format!("serialise session: {e}")))?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, data).map_err(|e| AppError::Memory(format!("cannot write {}: {e}", tmp.display())))?;
            fs::rename(&tmp, &path).map_err(|e| AppError::Memory(format!("cannot write {}: {e}", path.display())))
        })
        .await
    }
}

async fn blocking<F>(f: F) -> Result<(), AppError>
where
    F: FnOnce() -> Result<(), AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Memory(format!("persistence task failed: {e}")))?
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
