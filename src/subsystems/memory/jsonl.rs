//! Append-only JSON Lines record log with an in-memory copy.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::AppError;

use super::blocking;

pub struct JsonlLog<T> {
    path: Option<PathBuf>,
    records: Mutex<Vec<T>>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn in_memory() -> Self {
        Self { path: None, records: Mutex::new(Vec::new()) }
    }

    /// Load every well-formed line of `path`; the file is created on the
    /// first append.
    pub fn open(path: PathBuf) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", parent.display())))?;
        }
        let mut records = Vec::new();
        if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| AppError::Memory(format!("cannot read {}: {e}", path.display())))?;
            for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                match serde_json::from_str::<T>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed record"),
                }
            }
        }
        info!(path = %path.display(), records = records.len(), "record log loaded");
        Ok(Self { path: Some(path), records: Mutex::new(records) })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Write `record` to disk (when persistent), then keep it in memory.
    pub async fn append(&self, record: T) -> Result<(), AppError> {
        if let Some(path) = self.path.clone() {
            let mut line = serde_json::to_string(&record)
                .map_err(|e| AppError::Memory(format!("serialise record: {e}")))?;
            line.push('\n');
            blocking(move || {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| AppError::Memory(format!("cannot open {}: {e}", path.display())))?;
                file.write_all(line.as_bytes())
                    .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", path.display())))
            })
            .await?;
        }
        self.lock().push(record);
        Ok(())
    }

    /// Run `f` over the records in insertion order.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
    }

    #[tokio::test]
    async fn appends_survive_reopen_and_bad_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/log.jsonl");
        let log = JsonlLog::<Entry>::open(path.clone()).unwrap();
        assert!(log.is_empty());
        log.append(Entry { n: 1 }).await.unwrap();
        log.append(Entry { n: 2 }).await.unwrap();

        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("not json\n\n");
        fs::write(&path, text).unwrap();

        let reopened = JsonlLog::<Entry>::open(path).unwrap();
        assert_eq!(reopened.with(|r| r.to_vec()), vec![Entry { n: 1 }, Entry { n: 2 }]);
    }

    #[tokio::test]
    async fn in_memory_log_writes_nothing() {
        let log = JsonlLog::<Entry>::in_memory();
        log.append(Entry { n: 7 }).await.unwrap();
        assert_eq!(log.len(), 1);
    }
}
