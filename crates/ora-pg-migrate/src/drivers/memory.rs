//! In-memory source and target.
//!
//! [`MemorySource`] serves tables from vectors of rows; [`MemoryTarget`]
//! keeps loaded rows per table with real transaction semantics (writes are
//! staged until commit) and can be told to fail inserts, which is how the
//! retry and resume paths are exercised without a database.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::{
    OwnedConstraint, ReadFrom, ReadRequest, Row, SourceReader, SourceSession, SqlValue,
    TableDescriptor, TargetSession, TargetWriter,
};
use crate::error::{MigrateError, Result};

fn compare_keys(a: &[SqlValue], b: &[SqlValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn keys_equal(a: &[SqlValue], b: &[SqlValue]) -> bool {
    a.len() == b.len() && compare_keys(a, b) == Ordering::Equal
}

// === Source ===

#[derive(Default)]
struct SourceState {
    tables: BTreeMap<String, (TableDescriptor, Vec<Row>)>,
    constraints: Vec<OwnedConstraint>,
    rows_read: BTreeMap<String, usize>,
    unreachable: bool,
}

/// Source database held in memory.
pub struct MemorySource {
    schema: String,
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace a table. Constraints on the descriptor are served
    /// through `list_constraints`, as the catalog does.
    pub fn add_table(&self, mut table: TableDescriptor, rows: Vec<Row>) {
        let mut state = self.lock();
        let name = table.name.clone();
        state.constraints.retain(|c| c.table != name);
        for constraint in table.constraints.drain(..) {
            state.constraints.push(OwnedConstraint {
                table: name.clone(),
                constraint,
            });
        }
        table.row_count = rows.len() as i64;
        state.tables.insert(name, (table, rows));
    }

    pub fn add_constraint(&self, constraint: OwnedConstraint) {
        self.lock().constraints.push(constraint);
    }

    /// Make every call fail with a connectivity error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Rows handed out by `read_batch` for `table` so far.
    pub fn rows_read(&self, table: &str) -> usize {
        self.lock().rows_read.get(table).copied().unwrap_or(0)
    }

    fn check_reachable(state: &SourceState) -> Result<()> {
        if state.unreachable {
            return Err(MigrateError::connectivity("source", "memory source is unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Self::check_reachable(&self.lock())?;
        Ok(schema == self.schema)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let state = self.lock();
        Self::check_reachable(&state)?;
        if schema != self.schema {
            return Ok(Vec::new());
        }
        Ok(state.tables.values().map(|(t, _)| t.clone()).collect())
    }

    async fn list_constraints(&self, schema: &str) -> Result<Vec<OwnedConstraint>> {
        let state = self.lock();
        Self::check_reachable(&state)?;
        if schema != self.schema {
            return Ok(Vec::new());
        }
        Ok(state.constraints.clone())
    }

    async fn acquire(&self) -> Result<Box<dyn SourceSession>> {
        Self::check_reachable(&self.lock())?;
        Ok(Box::new(MemorySourceSession {
            state: self.state.clone(),
        }))
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

struct MemorySourceSession {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySourceSession {
    fn lock(&self) -> Result<MutexGuard<'_, SourceState>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        MemorySource::check_reachable(&state)?;
        Ok(state)
    }
}

fn table_rows<'a>(state: &'a SourceState, table: &str) -> Result<&'a (TableDescriptor, Vec<Row>)> {
    state
        .tables
        .get(table)
        .ok_or_else(|| MigrateError::Introspection(format!("table {} does not exist", table)))
}

#[async_trait]
impl SourceSession for MemorySourceSession {
    async fn read_batch(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>> {
        let mut state = self.lock()?;
        let (table, rows) = table_rows(&state, &request.table.name)?;

        let batch: Vec<Row> = if table.has_primary_key() {
            let mut sorted: Vec<&Row> = rows.iter().collect();
            sorted.sort_by(|a, b| compare_keys(&table.key_of(a), &table.key_of(b)));
            let after = match &request.from {
                ReadFrom::AfterKey(key) => Some(key),
                _ => None,
            };
            let skip = match &request.from {
                ReadFrom::Offset(n) => *n as usize,
                _ => 0,
            };
            sorted
                .into_iter()
                .filter(|r| after.map_or(true, |k| compare_keys(&table.key_of(r), k) == Ordering::Greater))
                .skip(skip)
                .take(request.batch_size)
                .cloned()
                .collect()
        } else {
            let skip = match &request.from {
                ReadFrom::Offset(n) => *n as usize,
                _ => 0,
            };
            rows.iter().skip(skip).take(request.batch_size).cloned().collect()
        };

        *state.rows_read.entry(request.table.name.clone()).or_default() += batch.len();
        Ok(batch)
    }

    async fn row_count(&mut self, table: &TableDescriptor) -> Result<i64> {
        let state = self.lock()?;
        Ok(table_rows(&state, &table.name)?.1.len() as i64)
    }

    async fn sample_keys(
        &mut self,
        table: &TableDescriptor,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let state = self.lock()?;
        let (descriptor, rows) = table_rows(&state, &table.name)?;
        let mut keys: Vec<Vec<SqlValue>> = rows.iter().map(|r| descriptor.key_of(r)).collect();
        keys.sort_by(|a, b| compare_keys(a, b));

        let mut rng = StdRng::seed_from_u64(seed);
        Ok(keys.choose_multiple(&mut rng, n).cloned().collect())
    }

    async fn fetch_rows(
        &mut self,
        table: &TableDescriptor,
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        let state = self.lock()?;
        let (descriptor, rows) = table_rows(&state, &table.name)?;
        Ok(rows
            .iter()
            .filter(|r| {
                let key = descriptor.key_of(r);
                keys.iter().any(|k| keys_equal(k, &key))
            })
            .cloned()
            .collect())
    }
}

// === Target ===

/// Something that happened on the target, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Ddl(String),
    /// A committed batch.
    Commit { table: String, rows: usize },
    Truncate(String),
}

#[derive(Debug, Default, Clone)]
struct TargetTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct TargetState {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), TargetTable>,
    events: Vec<TargetEvent>,
    insert_failures: BTreeMap<String, u32>,
    unreachable: bool,
    /// Delay applied to every bulk insert.
    write_latency: Duration,
    open_transactions: usize,
    max_open_transactions: usize,
}

impl TargetState {
    fn table(&self, schema: &str, table: &str) -> Result<&TargetTable> {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .ok_or_else(|| MigrateError::State(format!("relation {}.{} does not exist", schema, table)))
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> Result<&mut TargetTable> {
        self.tables
            .get_mut(&(schema.to_string(), table.to_string()))
            .ok_or_else(|| MigrateError::State(format!("relation {}.{} does not exist", schema, table)))
    }

    fn apply(&mut self, write: PendingWrite) -> Result<()> {
        let target = self.table_mut(&write.schema, &write.table)?;
        let positions: Vec<usize> = write
            .columns
            .iter()
            .map(|c| {
                target.columns.iter().position(|t| t == c).ok_or_else(|| {
                    MigrateError::State(format!("column {} does not exist on {}", c, write.table))
                })
            })
            .collect::<Result<_>>()?;
        let key_positions: Vec<usize> = write
            .key_columns
            .iter()
            .filter_map(|k| target.columns.iter().position(|t| t == k))
            .collect();

        let width = target.columns.len();
        for incoming in write.rows {
            let mut row = vec![SqlValue::Null; width];
            for (value, &pos) in incoming.into_iter().zip(&positions) {
                row[pos] = value;
            }
            let existing = if key_positions.is_empty() {
                None
            } else {
                let key: Vec<SqlValue> = key_positions.iter().map(|&i| row[i].clone()).collect();
                target.rows.iter().position(|r| {
                    let other: Vec<SqlValue> = key_positions.iter().map(|&i| r[i].clone()).collect();
                    keys_equal(&key, &other)
                })
            };
            match existing {
                Some(i) => target.rows[i] = row,
                None => target.rows.push(row),
            }
        }
        Ok(())
    }

    fn execute_ddl(&mut self, sql: &str) {
        self.events.push(TargetEvent::Ddl(sql.to_string()));
        if let Some(rest) = sql.strip_prefix("CREATE SCHEMA IF NOT EXISTS ") {
            self.schemas.insert(unquote(rest.trim()));
        } else if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let Some((name, body)) = rest.split_once(" (") else {
                return;
            };
            let Some((schema, table)) = name.split_once("\".\"") else {
                return;
            };
            let key = (unquote(&format!("{}\"", schema)), unquote(&format!("\"{}", table)));
            let columns = body
                .split(",\n")
                .map(str::trim)
                .filter(|item| item.starts_with('"'))
                .filter_map(|item| item[1..].split_once('"').map(|(c, _)| c.to_string()))
                .collect();
            self.tables.entry(key).or_insert(TargetTable {
                columns,
                rows: Vec::new(),
            });
        }
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').replace("\"\"", "\"")
}

#[derive(Debug, Clone)]
struct PendingWrite {
    schema: String,
    table: String,
    columns: Vec<String>,
    key_columns: Vec<String>,
    rows: Vec<Row>,
}

/// Target database held in memory.
#[derive(Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty table directly, bypassing DDL.
    pub fn create_table(&self, schema: &str, table: &str, columns: &[String]) {
        let mut state = self.lock();
        state.schemas.insert(schema.to_string());
        state.tables.insert(
            (schema.to_string(), table.to_string()),
            TargetTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
    }

    /// Append rows as if an earlier run had committed them.
    pub fn seed_rows(&self, schema: &str, table: &str, rows: Vec<Row>) {
        if let Ok(t) = self.lock().table_mut(schema, table) {
            t.rows.extend(rows);
        }
    }

    /// Fail the next `n` inserts into `table` with a constraint violation.
    pub fn fail_next_inserts(&self, table: &str, n: u32) {
        self.lock().insert_failures.insert(table.to_string(), n);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make every bulk insert take at least `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        self.lock().write_latency = latency;
    }

    /// Most transactions that were open at the same time.
    pub fn max_concurrent_transactions(&self) -> usize {
        self.lock().max_open_transactions
    }

    pub fn row_count_of(&self, schema: &str, table: &str) -> usize {
        self.lock().table(schema, table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn rows_of(&self, schema: &str, table: &str) -> Vec<Row> {
        self.lock()
            .table(schema, table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn with_rows_mut(&self, schema: &str, table: &str, f: impl FnOnce(&mut Vec<Row>)) {
        if let Ok(t) = self.lock().table_mut(schema, table) {
            f(&mut t.rows);
        }
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.lock().table(schema, table).is_ok()
    }

    pub fn events(&self) -> Vec<TargetEvent> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn acquire(&self) -> Result<Box<dyn TargetSession>> {
        if self.lock().unreachable {
            return Err(MigrateError::connectivity("target", "memory target is unreachable"));
        }
        Ok(Box::new(MemoryTargetSession {
            state: self.state.clone(),
            pending: None,
        }))
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

struct MemoryTargetSession {
    state: Arc<Mutex<TargetState>>,
    /// Staged writes of the open transaction.
    pending: Option<Vec<PendingWrite>>,
}

impl MemoryTargetSession {
    /// End the open transaction, returning its staged writes.
    fn close_transaction(&mut self) -> Option<Vec<PendingWrite>> {
        let writes = self.pending.take()?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.open_transactions = state.open_transactions.saturating_sub(1);
        Some(writes)
    }

    fn lock(&self) -> Result<MutexGuard<'_, TargetState>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.unreachable {
            return Err(MigrateError::connectivity("target", "memory target is unreachable"));
        }
        Ok(state)
    }
}

impl Drop for MemoryTargetSession {
    fn drop(&mut self) {
        self.close_transaction();
    }
}

#[async_trait]
impl TargetSession for MemoryTargetSession {
    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.lock()?.execute_ddl(sql);
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(MigrateError::State("transaction already open".to_string()));
        }
        {
            let mut state = self.lock()?;
            state.open_transactions += 1;
            state.max_open_transactions = state.max_open_transactions.max(state.open_transactions);
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let writes = self
            .close_transaction()
            .ok_or_else(|| MigrateError::State("no open transaction".to_string()))?;
        let mut state = self.lock()?;
        // Validate every write before applying any, so a commit is all or nothing
        for write in &writes {
            state.table(&write.schema, &write.table)?;
        }
        for write in writes {
            let table = write.table.clone();
            let rows = write.rows.len();
            state.apply(write)?;
            state.events.push(TargetEvent::Commit { table, rows });
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.close_transaction();
        Ok(())
    }

    async fn bulk_insert(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let latency = {
            let mut state = self.lock()?;
            state.table(schema, table)?;
            if let Some(remaining) = state.insert_failures.get_mut(table) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(MigrateError::constraint(
                        table,
                        "duplicate key value violates unique constraint (injected)",
                    ));
                }
            }
            state.write_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let write = PendingWrite {
            schema: schema.to_string(),
            table: table.to_string(),
            columns: columns.to_vec(),
            key_columns: key_columns.to_vec(),
            rows: rows.to_vec(),
        };
        match &mut self.pending {
            Some(pending) => pending.push(write),
            None => {
                let mut state = self.lock()?;
                state.apply(write)?;
                state.events.push(TargetEvent::Commit {
                    table: table.to_string(),
                    rows: rows.len(),
                });
            }
        }
        Ok(rows.len() as u64)
    }

    async fn truncate(&mut self, schema: &str, table: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.table_mut(schema, table)?.rows.clear();
        state.events.push(TargetEvent::Truncate(table.to_string()));
        Ok(())
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.lock()?.table(schema, table).is_ok())
    }

    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64> {
        Ok(self.lock()?.table(schema, table)?.rows.len() as i64)
    }

    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        let state = self.lock()?;
        let t = state.table(schema, table)?;
        let position = |name: &String| t.columns.iter().position(|c| c == name);
        let projection: Vec<Option<usize>> = columns.iter().map(position).collect();
        let key_positions: Vec<usize> = key_columns.iter().filter_map(position).collect();

        Ok(t.rows
            .iter()
            .filter(|r| {
                let key: Vec<SqlValue> = key_positions.iter().map(|&i| r[i].clone()).collect();
                keys.iter().any(|k| keys_equal(k, &key))
            })
            .map(|r| {
                projection
                    .iter()
                    .map(|p| p.map(|i| r[i].clone()).unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect())
    }
}
