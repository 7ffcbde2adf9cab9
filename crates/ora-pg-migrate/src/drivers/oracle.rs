//! Oracle source over ODBC.
//!
//! **Requirements:**
//! - The `oracle` feature must be enabled
//! - An Oracle ODBC driver (Instant Client ODBC package) registered in odbcinst.ini
//!   under the name given by `source.odbc_driver`
//!
//! ODBC calls block, so every statement runs on the blocking thread pool.
//! Each session owns one connection; the source keeps a separate one for
//! catalog queries.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use odbc_api::buffers::{Indicator, TextRowSet};
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tracing::{debug, info};

use super::oracle_sql::{self, TextRow, MAX_IN_LIST};
use crate::config::SourceConfig;
use crate::core::{
    OwnedConstraint, ReadRequest, Row, SourceReader, SourceSession, SqlValue, TableDescriptor,
};
use crate::error::{MigrateError, Result};

static ODBC_ENV: OnceLock<Environment> = OnceLock::new();

/// Rows fetched per ODBC round trip.
const FETCH_ROWS: usize = 500;

/// Catalog text values never exceed this.
const CATALOG_MAX_LEN: usize = 4096;

/// Longest value read from a data column. Longer LOBs fail their batch
/// instead of being cut short.
const DATA_MAX_LEN: usize = 65536;

/// ORA- codes and SQLSTATEs that mean the connection itself is gone.
const CONNECTION_LOST: &[&str] = &[
    "ORA-03113", "ORA-03114", "ORA-03135", "ORA-12170", "ORA-12514", "ORA-12541", "ORA-12543",
    "08S01", "08001",
];

fn environment() -> Result<&'static Environment> {
    if let Some(env) = ODBC_ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        MigrateError::connectivity(
            "source",
            format!(
                "Failed to create ODBC environment: {}. Make sure unixODBC and the Oracle ODBC driver are installed.",
                e
            ),
        )
    })?;
    Ok(ODBC_ENV.get_or_init(|| env))
}

fn classify_odbc(e: odbc_api::Error, context: &str) -> MigrateError {
    let text = e.to_string();
    if CONNECTION_LOST.iter().any(|code| text.contains(code)) {
        return MigrateError::connectivity("source", format!("{}: {}", context, text));
    }
    // ORA-01013: user requested cancel, which is how a statement timeout surfaces
    if text.contains("ORA-01013") {
        return MigrateError::timeout(context, 0);
    }
    MigrateError::Introspection(format!("{}: {}", context, text))
}

type SharedConnection = Arc<Mutex<Connection<'static>>>;

/// Execute `sql` and collect every row as text.
fn fetch_text(conn: &Connection<'static>, sql: &str, max_len: usize) -> Result<Vec<TextRow>> {
    let mut rows = Vec::new();
    let Some(mut cursor) = conn.execute(sql, ()).map_err(|e| classify_odbc(e, "ODBC query"))? else {
        return Ok(rows);
    };

    let num_cols = cursor
        .num_result_cols()
        .map_err(|e| classify_odbc(e, "reading column count"))? as usize;
    let mut buffers = TextRowSet::for_cursor(FETCH_ROWS, &mut cursor, Some(max_len))
        .map_err(|e| classify_odbc(e, "allocating row buffer"))?;
    let mut row_cursor = cursor
        .bind_buffer(&mut buffers)
        .map_err(|e| classify_odbc(e, "binding row buffer"))?;

    while let Some(batch) = row_cursor.fetch().map_err(|e| classify_odbc(e, "fetching rows"))? {
        for row_idx in 0..batch.num_rows() {
            let mut row = Vec::with_capacity(num_cols);
            for col_idx in 0..num_cols {
                if let Indicator::Length(len) = batch.indicator_at(col_idx, row_idx) {
                    if len > batch.max_len(col_idx) {
                        return Err(MigrateError::conversion(
                            format!("column {}", col_idx + 1),
                            format!("value of {} bytes exceeds the {} byte read limit", len, max_len),
                        ));
                    }
                }
                row.push(
                    batch
                        .at(col_idx, row_idx)
                        .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
                );
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

async fn run_query(conn: &SharedConnection, sql: String, max_len: usize) -> Result<Vec<TextRow>> {
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let guard = conn
            .lock()
            .map_err(|_| MigrateError::connectivity("source", "ODBC connection lock poisoned"))?;
        fetch_text(&guard, &sql, max_len)
    })
    .await
    .map_err(|e| MigrateError::connectivity("source", format!("ODBC worker failed: {}", e)))?
}

/// Oracle source.
pub struct OracleSource {
    connection_string: String,
    catalog: SharedConnection,
}

impl OracleSource {
    /// Connect and verify the listener answers.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let connection_string = config.connection_string();
        debug!(
            "ODBC connection (credentials hidden): Driver={{{}}};DBQ={}:{}/{};...",
            config.odbc_driver, config.host, config.port, config.service_name
        );

        let catalog = Self::connect(&connection_string).await?;
        let source = Self {
            connection_string,
            catalog,
        };
        source.health_check().await?;

        info!(
            "Connected to Oracle via ODBC: {}:{}/{}",
            config.host, config.port, config.service_name
        );
        Ok(source)
    }

    async fn connect(connection_string: &str) -> Result<SharedConnection> {
        let connection_string = connection_string.to_string();
        tokio::task::spawn_blocking(move || {
            let env = environment()?;
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| {
                    MigrateError::connectivity(
                        "source",
                        format!("Failed to connect to Oracle via ODBC: {}. Check the driver name, service name and credentials.", e),
                    )
                })?;
            Ok(Arc::new(Mutex::new(conn)))
        })
        .await
        .map_err(|e| MigrateError::connectivity("source", format!("ODBC worker failed: {}", e)))?
    }

    pub async fn health_check(&self) -> Result<()> {
        run_query(&self.catalog, "SELECT 1 FROM DUAL".to_string(), CATALOG_MAX_LEN).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceReader for OracleSource {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let rows = run_query(&self.catalog, oracle_sql::schema_exists_sql(schema), CATALOG_MAX_LEN).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
            > 0)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let tables = run_query(&self.catalog, oracle_sql::tables_sql(schema), CATALOG_MAX_LEN).await?;
        let columns = run_query(&self.catalog, oracle_sql::columns_sql(schema), CATALOG_MAX_LEN).await?;
        let pks = run_query(&self.catalog, oracle_sql::primary_keys_sql(schema), CATALOG_MAX_LEN).await?;
        let indexes = run_query(&self.catalog, oracle_sql::indexes_sql(schema), CATALOG_MAX_LEN).await?;

        let out = oracle_sql::assemble_tables(schema, &tables, &columns, &pks, &indexes);
        info!("Extracted {} tables from schema '{}' via ODBC", out.len(), schema);
        Ok(out)
    }

    async fn list_constraints(&self, schema: &str) -> Result<Vec<OwnedConstraint>> {
        let rows = run_query(&self.catalog, oracle_sql::constraints_sql(schema), CATALOG_MAX_LEN).await?;
        Ok(oracle_sql::assemble_constraints(&rows))
    }

    async fn acquire(&self) -> Result<Box<dyn SourceSession>> {
        let conn = Self::connect(&self.connection_string).await?;
        Ok(Box::new(OracleSession { conn }))
    }

    fn db_type(&self) -> &str {
        "oracle"
    }
}

struct OracleSession {
    conn: SharedConnection,
}

impl OracleSession {
    async fn query_rows(&self, table: &TableDescriptor, sql: String) -> Result<Vec<Row>> {
        let text_rows = run_query(&self.conn, sql, DATA_MAX_LEN).await?;
        text_rows
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(&table.columns)
                    .map(|(text, column)| oracle_sql::parse_value(text.as_deref(), column))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SourceSession for OracleSession {
    async fn read_batch(&mut self, request: &ReadRequest<'_>) -> Result<Vec<Row>> {
        let sql = oracle_sql::read_batch_sql(request)?;
        self.query_rows(request.table, sql).await
    }

    async fn row_count(&mut self, table: &TableDescriptor) -> Result<i64> {
        let rows = run_query(&self.conn, oracle_sql::count_sql(table)?, CATALOG_MAX_LEN).await?;
        rows.first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| MigrateError::Introspection(format!("no row count for {}", table.name)))
    }

    async fn sample_keys(
        &mut self,
        table: &TableDescriptor,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let key_columns: Vec<_> = table
            .primary_key
            .iter()
            .filter_map(|k| table.column(k))
            .collect();
        let text_rows = run_query(&self.conn, oracle_sql::sample_keys_sql(table, n, seed)?, DATA_MAX_LEN).await?;
        text_rows
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(&key_columns)
                    .map(|(text, column)| oracle_sql::parse_value(text.as_deref(), column))
                    .collect()
            })
            .collect()
    }

    async fn fetch_rows(
        &mut self,
        table: &TableDescriptor,
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_IN_LIST) {
            let sql = oracle_sql::fetch_rows_sql(table, chunk)?;
            rows.extend(self.query_rows(table, sql).await?);
        }
        Ok(rows)
    }
}
