//! Checkpoint store trait.
//!
//! The orchestrator and every table worker share one `Arc<dyn CheckpointStore>`.
//! Each call touches a single table's record, so workers never contend on
//! the same entry.

use async_trait::async_trait;

use super::BatchCheckpoint;
use crate::error::Result;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Discard every checkpoint and start recording for `run_id`.
    async fn reset(&self, run_id: &str) -> Result<()>;

    /// Check that the stored checkpoints belong to the current configuration.
    async fn ensure_resumable(&self) -> Result<()>;

    /// Run id the stored checkpoints were written under, if any.
    async fn run_id(&self) -> Result<Option<String>>;

    /// Current checkpoint of `table`, if its load is in progress.
    async fn load(&self, table: &str) -> Result<Option<BatchCheckpoint>>;

    /// Persist a checkpoint after a committed batch. Rejects a checkpoint that
    /// would move the table's cursor or row count backwards.
    async fn save(&self, checkpoint: BatchCheckpoint) -> Result<()>;

    /// Mark `table` finished and delete its checkpoint.
    async fn complete(&self, table: &str) -> Result<()>;

    async fn is_completed(&self, table: &str) -> Result<bool>;

    /// Forget `table` entirely (truncate-before-load).
    async fn clear(&self, table: &str) -> Result<()>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
