//! Post-load validation.
//!
//! For each table the engine compares exact row counts and, when they agree
//! and the table has a primary key, a seeded sample of rows: the sampled keys
//! are fetched from both sides, converted to their target representation and
//! compared by SHA-256 row hash. Tables without a primary key are checked by
//! count only.

mod hash;

pub use hash::{key_text, row_hash};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{SourceReader, SqlValue, TableDescriptor, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::transfer::with_timeout;
use crate::typemap::{convert_value, TypeMapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    CountMismatch,
    HashMismatch,
    /// The comparison itself could not run.
    Error,
}

/// Validation result for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    /// Keys sampled for hash comparison; 0 for count-only checks.
    pub sampled: usize,
    /// Sampled keys whose rows differ, at most the configured limit.
    pub mismatched_keys: Vec<String>,
    /// Total differing sampled rows, including ones not listed.
    pub mismatches: usize,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TableValidation {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }

    /// The mismatch as an error, for recording against the table.
    pub fn to_error(&self) -> Option<MigrateError> {
        let message = match self.status {
            ValidationStatus::Passed => return None,
            ValidationStatus::CountMismatch => format!(
                "row count differs: source {}, target {}",
                self.source_count, self.target_count
            ),
            ValidationStatus::HashMismatch => format!(
                "{} of {} sampled rows differ (keys: {})",
                self.mismatches,
                self.sampled,
                self.mismatched_keys.join("; ")
            ),
            ValidationStatus::Error => self
                .error
                .clone()
                .unwrap_or_else(|| "validation failed".to_string()),
        };
        Some(MigrateError::ValidationMismatch {
            table: self.table.clone(),
            message,
        })
    }
}

/// Validation results for a set of tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tables: Vec<TableValidation>,
    pub tables_passed: usize,
    pub tables_failed: usize,
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, result: TableValidation) {
        if result.passed() {
            self.tables_passed += 1;
        } else {
            self.tables_failed += 1;
        }
        self.tables.push(result);
    }

    pub fn is_success(&self) -> bool {
        self.tables_failed == 0
    }

    pub fn table(&self, name: &str) -> Option<&TableValidation> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Sampling and limits for [`ValidationEngine`].
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub sample_size: usize,
    pub max_mismatches: usize,
    pub seed: u64,
    pub timeout: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            sample_size: 100,
            max_mismatches: 10,
            seed: 42,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct ValidationEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    mapper: TypeMapper,
    target_schema: String,
    options: ValidationOptions,
}

impl ValidationEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        mapper: TypeMapper,
        target_schema: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            mapper,
            target_schema: target_schema.into(),
            options: ValidationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    /// Compare one table. Connectivity and mapping problems are returned as
    /// errors; differences in the data are reported in the result.
    pub async fn validate_table(&self, table: &TableDescriptor) -> Result<TableValidation> {
        let start = Instant::now();
        let timeout = self.options.timeout;
        let mut source = with_timeout(timeout, "open source session", self.source.acquire()).await?;
        let mut target = with_timeout(timeout, "open target session", self.target.acquire()).await?;

        let source_count = with_timeout(timeout, "count source rows", source.row_count(table)).await?;
        let target_count = with_timeout(
            timeout,
            "count target rows",
            target.row_count(&self.target_schema, &table.name),
        )
        .await?;

        let mut result = TableValidation {
            table: table.name.clone(),
            source_count,
            target_count,
            sampled: 0,
            mismatched_keys: Vec::new(),
            mismatches: 0,
            status: ValidationStatus::Passed,
            error: None,
            duration_ms: 0,
        };

        if source_count != target_count {
            warn!(
                "{}: row count mismatch (source {}, target {})",
                table.name, source_count, target_count
            );
            result.status = ValidationStatus::CountMismatch;
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        if !table.has_primary_key() || self.options.sample_size == 0 {
            debug!("{}: {} rows (count only)", table.name, source_count);
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let targets = self.mapper.map_table(table)?;
        let keys = with_timeout(
            timeout,
            "sample source keys",
            source.sample_keys(table, self.options.sample_size, self.options.seed),
        )
        .await?;
        result.sampled = keys.len();
        if keys.is_empty() {
            result.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let key_indices = table.key_indices();
        let target_keys = keys
            .iter()
            .map(|key| {
                key.iter()
                    .zip(&key_indices)
                    .map(|(value, &i)| convert_value(value.clone(), &table.columns[i], &targets[i]))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let source_rows = with_timeout(timeout, "fetch source rows", source.fetch_rows(table, &keys)).await?;
        let target_rows = with_timeout(
            timeout,
            "fetch target rows",
            target.fetch_rows(
                &self.target_schema,
                &table.name,
                &table.column_names(),
                &table.primary_key,
                &target_keys,
            ),
        )
        .await?;

        let source_hashes = self.hash_rows(table, &targets, source_rows);
        let target_hashes = self.hash_rows(table, &targets, target_rows);

        for key in &target_keys {
            let text = key_text(key);
            let matched = match (source_hashes.get(&text), target_hashes.get(&text)) {
                (Some(Some(a)), Some(Some(b))) => a == b,
                _ => false,
            };
            if !matched {
                result.mismatches += 1;
                if result.mismatched_keys.len() < self.options.max_mismatches {
                    result.mismatched_keys.push(text);
                }
            }
        }

        if result.mismatches > 0 {
            warn!(
                "{}: {} of {} sampled rows differ",
                table.name, result.mismatches, result.sampled
            );
            result.status = ValidationStatus::HashMismatch;
        } else {
            debug!("{}: {} rows, {} sampled rows match", table.name, source_count, result.sampled);
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Validate every table, recording per-table errors instead of stopping.
    pub async fn validate_all<'a>(
        &self,
        tables: impl IntoIterator<Item = &'a TableDescriptor>,
    ) -> ValidationReport {
        let start = Instant::now();
        let mut report = ValidationReport::new();
        for table in tables {
            let result = match self.validate_table(table).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("{}: validation could not run: {}", table.name, e);
                    TableValidation {
                        table: table.name.clone(),
                        source_count: 0,
                        target_count: 0,
                        sampled: 0,
                        mismatched_keys: Vec::new(),
                        mismatches: 0,
                        status: ValidationStatus::Error,
                        error: Some(e.to_string()),
                        duration_ms: 0,
                    }
                }
            };
            report.add_table(result);
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Validation: {} passed, {} failed",
            report.tables_passed, report.tables_failed
        );
        report
    }

    /// Key text -> row hash, or `None` for rows that cannot be converted.
    fn hash_rows(
        &self,
        table: &TableDescriptor,
        targets: &[crate::typemap::TargetType],
        rows: Vec<Vec<SqlValue>>,
    ) -> BTreeMap<String, Option<String>> {
        rows.into_iter()
            .map(|row| match self.mapper.convert_row(table, targets, row) {
                Ok(converted) => (key_text(&table.key_of(&converted)), Some(row_hash(&converted))),
                Err(e) => {
                    debug!("{}: sampled row not convertible: {}", table.name, e);
                    (String::new(), None)
                }
            })
            .collect()
    }
}
