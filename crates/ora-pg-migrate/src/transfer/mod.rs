//! Batched table loads with checkpoints and retries.
//!
//! A table is read in primary key order (keyset pagination) or, without a
//! primary key, in the source's surrogate order with offset cursors. Each
//! batch is converted by the type mapper and written in one target
//! transaction. After every commit the checkpoint moves to the last row of
//! the batch, so a resumed load starts at the first row not yet committed.

mod retry;

pub use retry::{with_timeout, RetryPolicy};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{ReadFrom, ReadRequest, Row, SourceReader, SourceSession, TableDescriptor, TargetSession, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::state::{BatchCheckpoint, CheckpointStore, Cursor};
use crate::typemap::{TargetType, TypeMapper};

/// Per-table load parameters.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub batch_size: usize,
    pub target_schema: String,
}

/// Result of one table load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationOutcome {
    pub table: String,
    /// Rows committed, including rows committed by earlier runs.
    pub rows_migrated: u64,
    /// Rows committed before this run picked the table up.
    pub resumed_from: u64,
    pub batches: u64,
    /// Batch attempts that failed and were retried.
    pub retries: u32,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Loads tables from the source into the target.
///
/// Cheap to clone; every worker gets its own copy and acquires its own
/// source and target sessions per table.
#[derive(Clone)]
pub struct DataMigrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    mapper: TypeMapper,
    store: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
    /// Optional shared counter for real-time progress reporting.
    progress: Option<Arc<AtomicU64>>,
}

impl DataMigrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        mapper: TypeMapper,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            source,
            target,
            mapper,
            store,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(300),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set a shared progress counter for real-time row tracking.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress = Some(counter);
        self
    }

    /// Load one table, resuming from its checkpoint if there is one.
    ///
    /// Returns [`MigrateError::Cancelled`] when the cancellation token fires
    /// between batches; the checkpoint then points at the last committed batch.
    pub async fn migrate_table(&self, table: &TableDescriptor, spec: &BatchSpec) -> Result<MigrationOutcome> {
        let start = Instant::now();
        let targets = self.mapper.map_table(table)?;
        let columns = table.column_names();
        let keyed = table.has_primary_key();

        let checkpoint = self.store.load(&table.name).await?;
        let (mut from, resumed_from) = match checkpoint {
            None => (ReadFrom::Start, 0),
            Some(cp) => {
                let from = match (cp.cursor, keyed) {
                    (Cursor::Key { values }, true) => ReadFrom::AfterKey(values),
                    (Cursor::Offset { rows }, false) => ReadFrom::Offset(rows),
                    _ => {
                        return Err(MigrateError::State(format!(
                            "checkpoint cursor for {} does not match its key layout",
                            table.name
                        )))
                    }
                };
                info!("{}: resuming after {} rows", table.name, cp.rows_migrated);
                (from, cp.rows_migrated)
            }
        };

        if !keyed {
            warn!("{}: no primary key, using offset pagination", table.name);
        }

        let mut source = with_timeout(self.timeout, "open source session", self.source.acquire()).await?;
        let mut target = with_timeout(self.timeout, "open target session", self.target.acquire()).await?;

        let mut outcome = MigrationOutcome {
            table: table.name.clone(),
            rows_migrated: resumed_from,
            resumed_from,
            ..Default::default()
        };
        let key_columns: &[String] = if keyed { &table.primary_key } else { &[] };

        loop {
            if self.cancel.is_cancelled() {
                info!("{}: cancelled after {} rows", table.name, outcome.rows_migrated);
                return Err(MigrateError::Cancelled);
            }

            let request = ReadRequest {
                table,
                from: from.clone(),
                batch_size: spec.batch_size,
            };
            let raw = self.read_batch(source.as_mut(), &request, &mut outcome).await?;
            if raw.is_empty() {
                break;
            }
            let fetched = raw.len();

            let cursor = match raw.last() {
                Some(last) if keyed => Cursor::Key {
                    values: table.key_of(last),
                },
                _ => Cursor::Offset {
                    rows: outcome.rows_migrated + fetched as u64,
                },
            };

            let rows = self.convert_batch(table, &targets, raw)?;
            self.write_batch(target.as_mut(), spec, table, &columns, key_columns, &rows, &mut outcome)
                .await?;

            outcome.rows_migrated += fetched as u64;
            outcome.batches += 1;
            if let Some(counter) = &self.progress {
                counter.fetch_add(fetched as u64, Ordering::Relaxed);
            }

            self.store
                .save(BatchCheckpoint::new(&table.name, cursor.clone(), outcome.rows_migrated))
                .await?;
            debug!(
                "{}: batch {} committed ({} rows total)",
                table.name, outcome.batches, outcome.rows_migrated
            );

            from = match cursor {
                Cursor::Key { values } => ReadFrom::AfterKey(values),
                Cursor::Offset { rows } => ReadFrom::Offset(rows),
            };
            if fetched < spec.batch_size {
                break;
            }
        }

        self.store.complete(&table.name).await?;
        outcome.elapsed = start.elapsed();

        let loaded = outcome.rows_migrated - outcome.resumed_from;
        let rows_per_sec = if outcome.elapsed.as_secs_f64() > 0.0 {
            (loaded as f64 / outcome.elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        info!(
            "{}: loaded {} rows in {:?} ({} rows/sec, {} batches, {} retries)",
            table.name, loaded, outcome.elapsed, rows_per_sec, outcome.batches, outcome.retries
        );
        Ok(outcome)
    }

    async fn read_batch(
        &self,
        source: &mut dyn SourceSession,
        request: &ReadRequest<'_>,
        outcome: &mut MigrationOutcome,
    ) -> Result<Vec<Row>> {
        let mut attempt = 0;
        loop {
            match with_timeout(self.timeout, "read batch", source.read_batch(request)).await {
                Ok(rows) => return Ok(rows),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    attempt += 1;
                    outcome.retries += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{}: read failed (attempt {}), retrying in {:?}: {}",
                        request.table.name, attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn convert_batch(&self, table: &TableDescriptor, targets: &[TargetType], raw: Vec<Row>) -> Result<Vec<Row>> {
        raw.into_iter()
            .map(|row| self.mapper.convert_row(table, targets, row))
            .collect()
    }

    /// Write one batch in its own transaction, rolling back and retrying
    /// transient failures.
    #[allow(clippy::too_many_arguments)]
    async fn write_batch(
        &self,
        target: &mut dyn TargetSession,
        spec: &BatchSpec,
        table: &TableDescriptor,
        columns: &[String],
        key_columns: &[String],
        rows: &[Row],
        outcome: &mut MigrationOutcome,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let result = async {
                with_timeout(self.timeout, "begin transaction", target.begin()).await?;
                with_timeout(
                    self.timeout,
                    "load batch",
                    target.bulk_insert(&spec.target_schema, &table.name, columns, key_columns, rows),
                )
                .await?;
                with_timeout(self.timeout, "commit batch", target.commit()).await
            }
            .await;

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if let Err(rollback_err) = with_timeout(self.timeout, "rollback batch", target.rollback()).await {
                warn!("{}: rollback failed: {}", table.name, rollback_err);
            }

            if !self.retry.should_retry(&err, attempt) {
                return Err(err);
            }
            attempt += 1;
            outcome.retries += 1;
            let delay = self.retry.delay_for(attempt);
            warn!(
                "{}: batch failed (attempt {}), retrying in {:?}: {}",
                table.name, attempt, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }
}
