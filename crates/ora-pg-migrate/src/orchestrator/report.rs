//! Run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunMode;
use crate::error::{ErrorKind, MigrateError, Result};
use crate::planner::{MigrationPlan, TableFailure, TableStatus};
use crate::verify::ValidationReport;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Every table reached the mode's final status.
    Success,
    /// Some tables failed or were interrupted.
    Partial,
    /// A fatal error stopped the run, or every table failed.
    Failure,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::Partial => "PARTIAL",
            RunOutcome::Failure => "FAILURE",
        })
    }
}

/// Final state of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    /// Dependency level the table was loaded in.
    pub level: usize,
    pub status: TableStatus,
    pub rows_migrated: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TableFailure>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: RunMode,

    /// Final status.
    pub outcome: RunOutcome,

    /// Whether the run continued from stored checkpoints.
    pub resumed: bool,

    /// Whether the run stopped early on a cancellation request.
    pub cancelled: bool,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Total tables in the plan.
    pub tables_total: usize,

    /// Tables that reached the mode's final status.
    pub tables_succeeded: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows migrated.
    pub rows_migrated: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    /// Error that aborted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<TableFailure>,

    /// Every table in plan order.
    pub tables: Vec<TableReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl MigrationReport {
    pub(crate) fn start(run_id: impl Into<String>, mode: RunMode, resumed: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            mode,
            outcome: RunOutcome::Success,
            resumed,
            cancelled: false,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables_total: 0,
            tables_succeeded: 0,
            tables_failed: 0,
            rows_migrated: 0,
            rows_per_second: 0,
            fatal_error: None,
            tables: Vec::new(),
            validation: None,
        }
    }

    pub(crate) fn set_fatal(&mut self, error: &MigrateError) {
        self.fatal_error = Some(TableFailure {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Fill in per-table results and the outcome from the plan's final state.
    pub(crate) fn finish(mut self, plan: &MigrationPlan, validated: bool) -> Self {
        self.completed_at = Utc::now();
        self.duration_seconds = (self.completed_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let goal = match (self.mode, validated) {
            (RunMode::SchemaOnly, _) => TableStatus::SchemaCreated,
            (_, true) => TableStatus::Validated,
            (_, false) => TableStatus::DataLoaded,
        };

        self.tables = plan
            .levels
            .iter()
            .enumerate()
            .flat_map(|(level, names)| names.iter().map(move |name| (level, name)))
            .map(|(level, name)| {
                let progress = plan.progress(name).cloned().unwrap_or_default();
                TableReport {
                    table: name.clone(),
                    level,
                    status: progress.status,
                    rows_migrated: progress.rows_migrated,
                    error: progress.error,
                }
            })
            .collect();

        self.tables_total = self.tables.len();
        self.tables_succeeded = self.tables.iter().filter(|t| t.status == goal).count();
        self.tables_failed = self
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .count();
        self.rows_migrated = self.tables.iter().map(|t| t.rows_migrated).sum();
        self.rows_per_second = if self.duration_seconds > 0.0 {
            (self.rows_migrated as f64 / self.duration_seconds) as i64
        } else {
            0
        };

        self.outcome = if self.fatal_error.is_some()
            || (self.tables_total > 0 && self.tables_failed == self.tables_total)
        {
            RunOutcome::Failure
        } else if self.tables_succeeded == self.tables_total {
            RunOutcome::Success
        } else {
            RunOutcome::Partial
        };
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.as_str())
            .collect()
    }

    /// Process exit code for the CLI: 0 on success, 130 when cancelled, the
    /// fatal error's code on failure, 5 when only validation failed, else 6.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            return ErrorKind::Cancelled.exit_code();
        }
        if let Some(fatal) = &self.fatal_error {
            return fatal.kind.exit_code();
        }
        if self.is_success() {
            return 0;
        }
        let only_validation = self
            .tables
            .iter()
            .filter_map(|t| t.error.as_ref())
            .all(|e| e.kind == ErrorKind::ValidationMismatch);
        if only_validation && self.tables_failed > 0 {
            ErrorKind::ValidationMismatch.exit_code()
        } else {
            6
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, TableDescriptor};
    use crate::planner::DependencyPlanner;

    fn plan_of(names: &[&str]) -> MigrationPlan {
        let tables = names
            .iter()
            .map(|n| {
                let mut t = TableDescriptor::new("HR", *n);
                t.columns.push(ColumnDescriptor::new("ID", "NUMBER", 1));
                t.primary_key.push("ID".to_string());
                t
            })
            .collect();
        DependencyPlanner::new().plan("HR", tables).unwrap()
    }

    fn walk(plan: &mut MigrationPlan, table: &str, to: &[TableStatus]) {
        for status in to {
            plan.transition(table, *status).unwrap();
        }
    }

    #[test]
    fn test_success_when_all_validated() {
        let mut plan = plan_of(&["A", "B"]);
        for t in ["A", "B"] {
            walk(
                &mut plan,
                t,
                &[
                    TableStatus::SchemaCreated,
                    TableStatus::DataLoading,
                    TableStatus::DataLoaded,
                    TableStatus::Validated,
                ],
            );
            plan.set_rows(t, 10);
        }
        let report = MigrationReport::start("r1", RunMode::Full, false).finish(&plan, true);
        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.tables_succeeded, 2);
        assert_eq!(report.rows_migrated, 20);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_partial_lists_failure_kind() {
        let mut plan = plan_of(&["A", "B"]);
        walk(&mut plan, "A", &[TableStatus::DataLoading, TableStatus::DataLoaded]);
        plan.fail(
            "B",
            &MigrateError::UnsupportedType {
                table: "B".into(),
                column: "GEO".into(),
                source_type: "SDO_GEOMETRY".into(),
            },
        );
        let report = MigrationReport::start("r2", RunMode::DataOnly, false).finish(&plan, false);
        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.failed_tables(), vec!["B"]);
        let b = report.table("B").unwrap();
        assert_eq!(b.error.as_ref().unwrap().kind, ErrorKind::UnsupportedType);
        assert_eq!(report.exit_code(), 6);
    }

    #[test]
    fn test_fatal_error_is_failure() {
        let plan = plan_of(&["A"]);
        let mut report = MigrationReport::start("r3", RunMode::Full, false);
        report.set_fatal(&MigrateError::connectivity("source", "listener down"));
        let report = report.finish(&plan, true);
        assert_eq!(report.outcome, RunOutcome::Failure);
        assert_eq!(report.exit_code(), 2);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"outcome\": \"FAILURE\""));
        assert!(json.contains("\"kind\": \"connectivity\""));
    }

    #[test]
    fn test_schema_only_goal() {
        let mut plan = plan_of(&["A"]);
        walk(&mut plan, "A", &[TableStatus::SchemaCreated]);
        let report = MigrationReport::start("r4", RunMode::SchemaOnly, false).finish(&plan, true);
        assert!(report.is_success());
    }
}
