//! Dependency-safe migration ordering.
//!
//! [`DependencyPlanner::plan`] turns introspected tables into a
//! [`MigrationPlan`]: tables partitioned into levels so that every table's
//! immediate foreign-key targets are loaded in an earlier level. Foreign keys
//! that would close a cycle (self-references included) are deferred and
//! created only after all data is loaded.

mod graph;
mod status;

pub use graph::DependencyGraph;
pub use status::TableStatus;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::TableDescriptor;
use crate::error::{ErrorKind, MigrateError, Result};

/// Whether a foreign key is created with the table or after the data load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    Immediate,
    Deferred,
}

/// One foreign key between two selected tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub constraint: String,
    /// Referencing table.
    pub from: String,
    /// Referenced table.
    pub to: String,
    pub mode: EdgeMode,
}

/// A foreign key whose referenced table is not being migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub table: String,
    pub constraint: String,
    pub referenced: String,
}

/// Failure recorded against a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Mutable per-table progress inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProgress {
    pub status: TableStatus,
    pub rows_migrated: u64,
    pub error: Option<TableFailure>,
}

impl Default for TableProgress {
    fn default() -> Self {
        Self {
            status: TableStatus::Pending,
            rows_migrated: 0,
            error: None,
        }
    }
}

/// Ordered migration plan with per-table status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source_schema: String,
    /// Tables in execution order (level by level, by name within a level).
    pub tables: Vec<TableDescriptor>,
    pub levels: Vec<Vec<String>>,
    pub edges: Vec<DependencyEdge>,
    pub external: Vec<ExternalReference>,
    pub progress: BTreeMap<String, TableProgress>,
}

impl MigrationPlan {
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Mode of the edge created for `constraint` on `table`, if it links two selected tables.
    pub fn edge_mode(&self, table: &str, constraint: &str) -> Option<EdgeMode> {
        self.edges
            .iter()
            .find(|e| e.from == table && e.constraint == constraint)
            .map(|e| e.mode)
    }

    pub fn deferred_edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter().filter(|e| e.mode == EdgeMode::Deferred)
    }

    /// Tables `table` must wait for: targets of its immediate foreign keys, excluding itself.
    pub fn dependencies(&self, table: &str) -> Vec<&str> {
        let deps: BTreeSet<&str> = self
            .edges
            .iter()
            .filter(|e| e.from == table && e.mode == EdgeMode::Immediate && e.to != table)
            .map(|e| e.to.as_str())
            .collect();
        deps.into_iter().collect()
    }

    pub fn status(&self, table: &str) -> TableStatus {
        self.progress
            .get(table)
            .map(|p| p.status)
            .unwrap_or(TableStatus::Pending)
    }

    pub fn progress(&self, table: &str) -> Option<&TableProgress> {
        self.progress.get(table)
    }

    /// Move `table` to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, table: &str, next: TableStatus) -> Result<()> {
        let progress = self
            .progress
            .get_mut(table)
            .ok_or_else(|| MigrateError::State(format!("table {} is not in the plan", table)))?;
        if progress.status == next && next == TableStatus::DataLoading {
            // A resumed table re-enters its load
            return Ok(());
        }
        if !progress.status.can_transition_to(next) {
            return Err(MigrateError::State(format!(
                "illegal transition for {}: {} -> {}",
                table, progress.status, next
            )));
        }
        debug!("{}: {} -> {}", table, progress.status, next);
        progress.status = next;
        Ok(())
    }

    /// Mark `table` FAILED with the error that caused it. Already-terminal tables keep their status.
    pub fn fail(&mut self, table: &str, error: &MigrateError) {
        let Some(progress) = self.progress.get_mut(table) else {
            return;
        };
        if !progress.status.can_transition_to(TableStatus::Failed) {
            warn!(
                "{}: not marking failed from {} ({})",
                table, progress.status, error
            );
            return;
        }
        progress.status = TableStatus::Failed;
        progress.error = Some(TableFailure {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn set_rows(&mut self, table: &str, rows: u64) {
        if let Some(progress) = self.progress.get_mut(table) {
            progress.rows_migrated = rows;
        }
    }

    /// Return every table to PENDING, clearing rows and errors.
    pub fn reset_progress(&mut self) {
        for progress in self.progress.values_mut() {
            *progress = TableProgress::default();
        }
    }

    pub fn count_with_status(&self, status: TableStatus) -> usize {
        self.progress.values().filter(|p| p.status == status).count()
    }
}

/// Builds [`MigrationPlan`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyPlanner;

impl DependencyPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan the given tables. Deterministic: the same input always yields the
    /// same levels and the same deferred edges.
    pub fn plan(&self, source_schema: &str, tables: Vec<TableDescriptor>) -> Result<MigrationPlan> {
        let mut by_name: BTreeMap<String, TableDescriptor> =
            tables.into_iter().map(|t| (t.name.clone(), t)).collect();

        let mut graph = DependencyGraph::new();
        for name in by_name.keys() {
            graph.add_node(name);
        }

        let mut edges = Vec::new();
        let mut external = Vec::new();

        // Insertion order decides which edge of a cycle is deferred, so keep it
        // stable: by table name, then by constraint name
        for table in by_name.values() {
            let mut fks: Vec<_> = table.foreign_keys().collect();
            fks.sort_by(|a, b| a.0.name.cmp(&b.0.name));

            for (constraint, fk) in fks {
                let in_set = fk.referenced_schema == table.schema
                    && by_name.contains_key(&fk.referenced_table);
                if fk.external || !in_set {
                    external.push(ExternalReference {
                        table: table.name.clone(),
                        constraint: constraint.name.clone(),
                        referenced: format!("{}.{}", fk.referenced_schema, fk.referenced_table),
                    });
                    continue;
                }

                let mode = if !fk.deferred && graph.try_add_edge(&table.name, &fk.referenced_table) {
                    EdgeMode::Immediate
                } else {
                    EdgeMode::Deferred
                };
                if mode == EdgeMode::Deferred {
                    debug!(
                        "{}: deferring {} -> {}",
                        constraint.name, table.name, fk.referenced_table
                    );
                }
                edges.push(DependencyEdge {
                    constraint: constraint.name.clone(),
                    from: table.name.clone(),
                    to: fk.referenced_table.clone(),
                    mode,
                });
            }
        }

        let levels = graph.levels()?;
        let mut ordered = Vec::with_capacity(by_name.len());
        for level in &levels {
            for name in level {
                if let Some(table) = by_name.remove(name) {
                    ordered.push(table);
                }
            }
        }

        let progress = ordered
            .iter()
            .map(|t| (t.name.clone(), TableProgress::default()))
            .collect();

        let deferred = edges.iter().filter(|e| e.mode == EdgeMode::Deferred).count();
        info!(
            "Planned {} tables in {} levels ({} deferred foreign keys, {} external references)",
            ordered.len(),
            levels.len(),
            deferred,
            external.len()
        );

        Ok(MigrationPlan {
            source_schema: source_schema.to_string(),
            tables: ordered,
            levels,
            edges,
            external,
            progress,
        })
    }
}
