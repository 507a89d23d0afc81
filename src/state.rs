//! Cursor persistence between runs.
//!
//! The store holds the last acknowledged Telegram update id. It is read once
//! at the start of a run and written once at the end; the write is atomic
//! (temp file + rename) so a crash mid-write never corrupts the cursor.
//!
//! The [`StateStore`] trait exists so the orchestrator can be exercised with
//! an in-memory fake in tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or saving processor state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted processing state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorState {
    /// Last acknowledged update id; `None` means "start from now"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_id: Option<i64>,
}

/// Storage contract for the processing cursor
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<ProcessorState, StateError>;
    async fn save(&self, state: &ProcessorState) -> Result<(), StateError>;
}

/// File-backed state store (state.json)
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<ProcessorState, StateError> {
        if !self.path.exists() {
            return Ok(ProcessorState::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;

        // A corrupt state file falls back to the default rather than
        // aborting every future run.
        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "State file is corrupt, starting fresh"
                );
                Ok(ProcessorState::default())
            }
        }
    }

    async fn save(&self, state: &ProcessorState) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(state)?;
        atomic_write(&self.path, &content)?;
        Ok(())
    }
}

/// In-memory store for tests and dry experimentation
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<ProcessorState>,
}

impl MemoryStateStore {
    pub fn with_cursor(last_update_id: Option<i64>) -> Self {
        Self {
            inner: Mutex::new(ProcessorState { last_update_id }),
        }
    }

    pub fn cursor(&self) -> Option<i64> {
        self.inner.lock().expect("state lock poisoned").last_update_id
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<ProcessorState, StateError> {
        Ok(self.inner.lock().expect("state lock poisoned").clone())
    }

    async fn save(&self, state: &ProcessorState) -> Result<(), StateError> {
        *self.inner.lock().expect("state lock poisoned") = state.clone();
        Ok(())
    }
}

/// Write `content` to `path` atomically via a temp file in the same
/// directory followed by a rename.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp, content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
