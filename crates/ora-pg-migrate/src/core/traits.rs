//! Collaborator traits for the migration engine.
//!
//! - [`SourceReader`] / [`SourceSession`]: catalog and row access on the source
//! - [`TargetWriter`] / [`TargetSession`]: DDL, transactional loads and reads on the target
//!
//! The reader and writer are shared handles. Each worker acquires its own
//! session for the lifetime of a table job; sessions are never shared.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{ConstraintDescriptor, TableDescriptor};
use super::value::{Row, SqlValue};

/// Where a batch read starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadFrom {
    /// First row of the table.
    Start,
    /// Strictly after this primary key tuple, in primary key order.
    AfterKey(Vec<SqlValue>),
    /// Skip this many rows of the stable surrogate ordering. Used for tables without a primary key.
    Offset(u64),
}

/// A single batch read.
#[derive(Debug, Clone)]
pub struct ReadRequest<'a> {
    pub table: &'a TableDescriptor,
    pub from: ReadFrom,
    pub batch_size: usize,
}

/// A constraint and the table that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedConstraint {
    pub table: String,
    pub constraint: ConstraintDescriptor,
}

/// Catalog access on the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Whether the schema (Oracle owner) exists.
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// Tables with columns, primary key, indexes and approximate row counts.
    /// Constraints other than the primary key are loaded separately.
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>>;

    /// Unique, check and foreign key constraints for every table in the schema.
    async fn list_constraints(&self, schema: &str) -> Result<Vec<OwnedConstraint>>;

    /// Open a dedicated session for one worker.
    async fn acquire(&self) -> Result<Box<dyn SourceSession>>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// A single source connection owned by one worker.
#[async_trait]
pub trait SourceSession: Send {
    /// Read up to `batch_size` rows. Rows come back in primary key order (or the
    /// surrogate order for offset reads) with columns in table ordinal order.
    async fn read_batch(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>>;

    /// Exact row count.
    async fn row_count(&mut self, table: &TableDescriptor) -> Result<i64>;

    /// Up to `n` primary key tuples chosen pseudo-randomly; the same seed yields the same keys.
    async fn sample_keys(
        &mut self,
        table: &TableDescriptor,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Vec<SqlValue>>>;

    /// Rows whose primary key is in `keys`, in no particular order.
    async fn fetch_rows(
        &mut self,
        table: &TableDescriptor,
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>>;
}

/// Connection factory for the target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Open a dedicated session for one worker.
    async fn acquire(&self) -> Result<Box<dyn TargetSession>>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// A single target connection owned by one worker.
#[async_trait]
pub trait TargetSession: Send {
    /// Execute one DDL statement outside any explicit transaction.
    async fn execute_ddl(&mut self, sql: &str) -> Result<()>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Insert rows into `schema.table`. With a non-empty `key_columns` the
    /// insert is an upsert on that key, so replaying a committed batch is harmless.
    /// Returns the number of rows written.
    async fn bulk_insert(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;

    async fn truncate(&mut self, schema: &str, table: &str) -> Result<()>;

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool>;

    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64>;

    /// Rows whose `key_columns` tuple is in `keys`, columns in the order of `columns`.
    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>>;
}
