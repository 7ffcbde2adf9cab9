//! JSON file checkpoint store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{BatchCheckpoint, CheckpointState, CheckpointStore};
use crate::error::{MigrateError, Result};

/// Checkpoints in a single HMAC-signed JSON file, rewritten atomically on
/// every change.
pub struct FileCheckpointStore {
    path: PathBuf,
    config_hash: String,
    state: Mutex<Option<CheckpointState>>,
}

impl FileCheckpointStore {
    /// Open the store at `path`. An existing file is loaded and verified; a
    /// missing one is created on the first write.
    pub fn open(path: impl Into<PathBuf>, config_hash: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let state = CheckpointState::load(&path)?;
            info!(
                "Loaded checkpoints for run {} from {:?} ({} in progress, {} completed)",
                state.run_id,
                path,
                state.checkpoints.len(),
                state.completed.len()
            );
            Some(state)
        } else {
            None
        };
        Ok(Self {
            path,
            config_hash: config_hash.into(),
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<CheckpointState>>> {
        self.state
            .lock()
            .map_err(|_| MigrateError::State("checkpoint store lock poisoned".to_string()))
    }

    /// Apply `f` to the current state and write the result.
    fn update<T>(&self, f: impl FnOnce(&mut CheckpointState) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let state = guard
            .as_mut()
            .ok_or_else(|| MigrateError::State("no run has been started".to_string()))?;
        state.validate_config(&self.config_hash)?;
        let out = f(state)?;
        state.save(&self.path)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&CheckpointState) -> T) -> Result<Option<T>> {
        let guard = self.lock()?;
        match guard.as_ref() {
            Some(state) => {
                state.validate_config(&self.config_hash)?;
                Ok(Some(f(state)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn reset(&self, run_id: &str) -> Result<()> {
        let mut state = CheckpointState::new(run_id, self.config_hash.clone());
        state.save(&self.path)?;
        *self.lock()? = Some(state);
        debug!("Reset checkpoints at {:?} for run {}", self.path, run_id);
        Ok(())
    }

    async fn ensure_resumable(&self) -> Result<()> {
        let guard = self.lock()?;
        match guard.as_ref() {
            Some(state) => state.validate_config(&self.config_hash),
            None => Err(MigrateError::State(format!(
                "no checkpoint file at {:?}",
                self.path
            ))),
        }
    }

    async fn run_id(&self) -> Result<Option<String>> {
        let guard = self.lock()?;
        Ok(guard.as_ref().map(|s| s.run_id.clone()))
    }

    async fn load(&self, table: &str) -> Result<Option<BatchCheckpoint>> {
        Ok(self.read(|s| s.checkpoint(table).cloned())?.flatten())
    }

    async fn save(&self, checkpoint: BatchCheckpoint) -> Result<()> {
        self.update(|s| s.record(checkpoint))
    }

    async fn complete(&self, table: &str) -> Result<()> {
        self.update(|s| {
            s.complete(table);
            Ok(())
        })
    }

    async fn is_completed(&self, table: &str) -> Result<bool> {
        Ok(self.read(|s| s.is_completed(table))?.unwrap_or(false))
    }

    async fn clear(&self, table: &str) -> Result<()> {
        self.update(|s| {
            s.clear(table);
            Ok(())
        })
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
