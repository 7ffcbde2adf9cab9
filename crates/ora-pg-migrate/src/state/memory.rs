//! In-process checkpoint store.
//!
//! Used when no state file is configured. Checkpoints live as long as the
//! store, which is enough to resume within one process (and in tests).

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::warn;

use super::{BatchCheckpoint, CheckpointState, CheckpointStore};
use crate::error::{MigrateError, Result};

pub struct MemoryCheckpointStore {
    state: Mutex<CheckpointState>,
    warned: std::sync::atomic::AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CheckpointState::new("", "")),
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CheckpointState>> {
        self.state
            .lock()
            .map_err(|_| MigrateError::State("checkpoint store lock poisoned".to_string()))
    }

    fn warn_once(&self) {
        if !self
            .warned
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            warn!(
                "Using in-memory checkpoints: progress will not survive a restart. \
                 Set a state file to resume across processes."
            );
        }
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> Result<CheckpointState> {
        Ok(self.lock()?.clone())
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn reset(&self, run_id: &str) -> Result<()> {
        self.warn_once();
        *self.lock()? = CheckpointState::new(run_id, "");
        Ok(())
    }

    async fn ensure_resumable(&self) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn run_id(&self) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(Some(state.run_id.clone()).filter(|id| !id.is_empty()))
    }

    async fn load(&self, table: &str) -> Result<Option<BatchCheckpoint>> {
        Ok(self.lock()?.checkpoint(table).cloned())
    }

    async fn save(&self, checkpoint: BatchCheckpoint) -> Result<()> {
        self.lock()?.record(checkpoint)
    }

    async fn complete(&self, table: &str) -> Result<()> {
        self.lock()?.complete(table);
        Ok(())
    }

    async fn is_completed(&self, table: &str) -> Result<bool> {
        Ok(self.lock()?.is_completed(table))
    }

    async fn clear(&self, table: &str) -> Result<()> {
        self.lock()?.clear(table);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
