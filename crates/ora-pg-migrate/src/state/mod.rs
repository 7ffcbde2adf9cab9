//! Per-table batch checkpoints for resume.
//!
//! A checkpoint records how far a table's load has committed: the last key
//! tuple (or row offset for tables without a primary key) and the rows
//! migrated so far. It is written after every committed batch and removed
//! when the table finishes.

mod backend;
mod file;
mod memory;

pub use backend::CheckpointStore;
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::core::SqlValue;
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Position of the last committed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Primary key tuple of the last committed row.
    Key { values: Vec<SqlValue> },
    /// Rows committed so far in the surrogate ordering.
    Offset { rows: u64 },
}

impl Cursor {
    /// Ordering between two cursors of the same kind; `None` across kinds.
    pub fn compare(&self, other: &Cursor) -> Option<Ordering> {
        match (self, other) {
            (Cursor::Offset { rows: a }, Cursor::Offset { rows: b }) => Some(a.cmp(b)),
            (Cursor::Key { values: a }, Cursor::Key { values: b }) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

/// Progress of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub table: String,
    pub cursor: Cursor,
    pub rows_migrated: u64,
    pub updated_at: DateTime<Utc>,
}

impl BatchCheckpoint {
    pub fn new(table: impl Into<String>, cursor: Cursor, rows_migrated: u64) -> Self {
        Self {
            table: table.into(),
            cursor,
            rows_migrated,
            updated_at: Utc::now(),
        }
    }
}

/// Everything the checkpoint file holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub run_id: String,

    /// SHA256 hash of the configuration the checkpoints were written under.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// In-progress tables.
    pub checkpoints: BTreeMap<String, BatchCheckpoint>,

    /// Tables whose load finished during this run.
    pub completed: BTreeSet<String>,

    /// HMAC-SHA256 over the serialized state (this field excluded), keyed by config_hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl CheckpointState {
    pub fn new(run_id: impl Into<String>, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            config_hash: config_hash.into(),
            started_at: now,
            updated_at: now,
            checkpoints: BTreeMap::new(),
            completed: BTreeSet::new(),
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load and verify a checkpoint file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(MigrateError::State(
                "checkpoint file integrity check failed: HMAC mismatch".to_string(),
            )),
            None => Err(MigrateError::State(
                "checkpoint file has no HMAC signature".to_string(),
            )),
        }
    }

    /// Sign and write atomically (temp file, then rename).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.updated_at = Utc::now();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Record a checkpoint. Cursors and row counts may only move forward.
    pub fn record(&mut self, checkpoint: BatchCheckpoint) -> Result<()> {
        if let Some(previous) = self.checkpoints.get(&checkpoint.table) {
            if checkpoint.rows_migrated < previous.rows_migrated {
                return Err(MigrateError::State(format!(
                    "checkpoint for {} would move back from {} to {} rows",
                    checkpoint.table, previous.rows_migrated, checkpoint.rows_migrated
                )));
            }
            match checkpoint.cursor.compare(&previous.cursor) {
                Some(Ordering::Less) => {
                    return Err(MigrateError::State(format!(
                        "checkpoint cursor for {} would move backwards",
                        checkpoint.table
                    )))
                }
                None => {
                    return Err(MigrateError::State(format!(
                        "checkpoint cursor for {} changed kind or is not comparable",
                        checkpoint.table
                    )))
                }
                _ => {}
            }
        }
        self.completed.remove(&checkpoint.table);
        self.checkpoints.insert(checkpoint.table.clone(), checkpoint);
        Ok(())
    }

    pub fn complete(&mut self, table: &str) {
        self.checkpoints.remove(table);
        self.completed.insert(table.to_string());
    }

    pub fn checkpoint(&self, table: &str) -> Option<&BatchCheckpoint> {
        self.checkpoints.get(table)
    }

    pub fn is_completed(&self, table: &str) -> bool {
        self.completed.contains(table)
    }

    /// Forget one table's progress.
    pub fn clear(&mut self, table: &str) {
        self.checkpoints.remove(table);
        self.completed.remove(table);
    }
}
