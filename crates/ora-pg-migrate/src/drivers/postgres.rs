//! PostgreSQL target over a deadpool connection pool.
//!
//! Keyed tables are written with multi-row `INSERT ... ON CONFLICT` so a
//! replayed batch updates rows in place. Keyless tables go through COPY.
//! Each session owns one pooled client for its whole table job and drives
//! transactions with plain `BEGIN`/`COMMIT`/`ROLLBACK`.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::{Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info};

use crate::config::TargetConfig;
use crate::core::identifier::{escape_literal, pg_column_list, qualify_pg, quote_pg};
use crate::core::{Row, SqlValue, TargetSession, TargetWriter};
use crate::error::{MigrateError, Result};

/// Rows per generated upsert statement.
const UPSERT_CHUNK_SIZE: usize = 1000;

/// Rows buffered before a COPY flush.
const COPY_CHUNK_SIZE: usize = 10_000;

/// PostgreSQL target.
pub struct PgTarget {
    pool: Pool,
    config: TargetConfig,
}

impl PgTarget {
    /// Create the pool and make sure the server answers.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        let target = Self {
            pool,
            config: config.clone(),
        };
        target.health_check().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(target)
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> Result<()> {
        let client = self.get_client("health check").await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| classify_error(e, &self.config.database))?;
        Ok(())
    }

    async fn get_client(&self, context: &str) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            MigrateError::connectivity(
                "target",
                format!(
                    "{} ({}:{}/{}): {}",
                    context, self.config.host, self.config.port, self.config.database, e
                ),
            )
        })
    }
}

#[async_trait]
impl TargetWriter for PgTarget {
    async fn acquire(&self) -> Result<Box<dyn TargetSession>> {
        let client = self.get_client("acquiring target session").await?;
        // Timestamps come back in UTC and intervals in the `1 day 02:03:04`
        // form the converter reads
        client
            .simple_query("SET TIME ZONE 'UTC'; SET intervalstyle = 'postgres'")
            .await
            .map_err(|e| classify_error(e, "session"))?;
        Ok(Box::new(PgSession {
            client,
            in_transaction: false,
        }))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

struct PgSession {
    client: Object,
    in_transaction: bool,
}

impl PgSession {
    async fn simple(&self, sql: &str, table: &str) -> Result<Vec<SimpleQueryMessage>> {
        self.client
            .simple_query(sql)
            .await
            .map_err(|e| classify_error(e, table))
    }

    async fn copy_rows(&self, schema: &str, table: &str, columns: &[String], rows: &[Row]) -> Result<u64> {
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualify_pg(schema, table)?,
            pg_column_list(columns)?
        );

        let sink = self
            .client
            .copy_in(&copy_stmt)
            .await
            .map_err(|e| classify_error(e, table))?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(1024 * 1024);
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    buf.put_u8(b'\t');
                }
                buf.extend_from_slice(sql_value_to_copy_text(value).as_bytes());
            }
            buf.put_u8(b'\n');

            if (i + 1) % COPY_CHUNK_SIZE == 0 || i + 1 == rows.len() {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| classify_error(e, table))?;
            }
        }

        sink.finish().await.map_err(|e| classify_error(e, table))
    }

    async fn upsert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let mut total = 0u64;
        for chunk in rows.chunks(UPSERT_CHUNK_SIZE) {
            let sql = build_upsert_sql(schema, table, columns, key_columns, chunk)?;
            if let Err(e) = self.simple(&sql, table).await {
                if let Some(first_row) = chunk.first() {
                    let row_preview: Vec<String> =
                        first_row.iter().take(5).map(|v| format!("{:?}", v)).collect();
                    error!(
                        "Upsert failed for {}.{}: {} - first row preview: {:?}",
                        schema, table, e, row_preview
                    );
                }
                return Err(e);
            }
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

#[async_trait]
impl TargetSession for PgSession {
    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        debug!("DDL: {}", sql);
        self.simple(sql, "ddl").await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.simple("BEGIN", "transaction").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.simple("COMMIT", "transaction").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.simple("ROLLBACK", "transaction").await?;
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
        if rows.is_empty() {
            return Ok(0);
        }
        if key_columns.is_empty() {
            self.copy_rows(schema, table, columns, rows).await
        } else {
            self.upsert_rows(schema, table, columns, key_columns, rows).await
        }
    }

    async fn truncate(&mut self, schema: &str, table: &str) -> Result<()> {
        // a referenced table cannot be truncated without CASCADE, even when its children are empty
        let sql = format!("TRUNCATE TABLE {} CASCADE", qualify_pg(schema, table)?);
        self.simple(&sql, table).await?;
        debug!("Truncated table {}.{}", schema, table);
        Ok(())
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&schema, &table],
            )
            .await
            .map_err(|e| classify_error(e, table))?;
        Ok(row.get(0))
    }

    async fn row_count(&mut self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_pg(schema, table)?);
        let row = self
            .client
            .query_one(&sql, &[])
            .await
            .map_err(|e| classify_error(e, table))?;
        Ok(row.get(0))
    }

    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        keys: &[Vec<SqlValue>],
    ) -> Result<Vec<Row>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let key_list: Vec<String> = keys
            .iter()
            .map(|k| format!("({})", k.iter().map(sql_value_to_literal).collect::<Vec<_>>().join(", ")))
            .collect();
        // Simple-query rows arrive in text form, which the type mapper accepts
        let sql = format!(
            "SELECT {} FROM {} WHERE ({}) IN ({})",
            pg_column_list(columns)?,
            qualify_pg(schema, table)?,
            pg_column_list(key_columns)?,
            key_list.join(", ")
        );

        let messages = self.simple(&sql, table).await?;
        Ok(messages
            .iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| match row.get(i) {
                            Some(text) => SqlValue::Text(text.to_string()),
                            None => SqlValue::Null,
                        })
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }
}

/// Map a driver error onto the engine's error kinds.
///
/// SQLSTATE class 23 is a constraint violation and class 08 (or a closed
/// connection) is a connectivity failure; both are retryable.
fn classify_error(e: tokio_postgres::Error, table: &str) -> MigrateError {
    if e.is_closed() {
        return MigrateError::connectivity("target", e.to_string());
    }
    if let Some(db) = e.as_db_error() {
        let code = db.code().code();
        if code.starts_with("23") {
            return MigrateError::constraint(table, db.message().to_string());
        }
        if code.starts_with("08") {
            return MigrateError::connectivity("target", db.message().to_string());
        }
        return MigrateError::Target(e);
    }
    // No server response at all: the socket failed underneath us
    if std::error::Error::source(&e).map_or(false, |s| s.is::<std::io::Error>()) {
        return MigrateError::connectivity("target", e.to_string());
    }
    MigrateError::Target(e)
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        f.to_string()
    }
}

/// Convert SqlValue to text format for COPY.
fn sql_value_to_copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => float_text(f64::from(*n)),
        SqlValue::F64(n) => float_text(*n),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::WideDecimal(s) => escape_copy_text(s),
        SqlValue::Text(s) | SqlValue::Interval(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Date(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        SqlValue::DateTimeTz(dt) => dt.to_rfc3339(),
    }
}

/// Escape backslash, tab, newline and carriage return for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// Convert SqlValue to SQL literal string.
fn sql_value_to_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => format!("'{}'::real", float_text(f64::from(*n))),
        SqlValue::F64(n) => format!("'{}'::double precision", float_text(*n)),
        SqlValue::Decimal(d) => format!("{}::numeric", d),
        SqlValue::WideDecimal(s) => format!("'{}'::numeric", escape_literal(s)),
        SqlValue::Text(s) => format!("'{}'", escape_literal(s)),
        SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
        SqlValue::Date(d) => format!("'{}'::date", d),
        SqlValue::DateTime(dt) => format!("'{}'::timestamp", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
        SqlValue::DateTimeTz(dt) => format!("'{}'::timestamptz", dt.to_rfc3339()),
        SqlValue::Interval(s) => format!("'{}'::interval", escape_literal(s)),
    }
}

/// Build a multi-row upsert with literal values.
///
/// Rows whose non-key columns are unchanged are left alone; tables made only
/// of key columns fall back to `DO NOTHING`.
fn build_upsert_sql(
    schema: &str,
    table: &str,
    columns: &[String],
    key_columns: &[String],
    rows: &[Row],
) -> Result<String> {
    let col_list = pg_column_list(columns)?;
    let key_list = pg_column_list(key_columns)?;
    let quoted_table = quote_pg(table)?;

    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(sql_value_to_literal).collect();
            format!("({})", values.join(", "))
        })
        .collect();

    let mut update_cols = Vec::new();
    let mut change_detection = Vec::new();
    for c in columns.iter().filter(|c| !key_columns.contains(c)) {
        let quoted = quote_pg(c)?;
        update_cols.push(format!("{} = EXCLUDED.{}", quoted, quoted));
        change_detection.push(format!(
            "{}.{} IS DISTINCT FROM EXCLUDED.{}",
            quoted_table, quoted, quoted
        ));
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({})",
        qualify_pg(schema, table)?,
        col_list,
        value_rows.join(", "),
        key_list
    );

    if update_cols.is_empty() {
        Ok(format!("{} DO NOTHING", insert))
    } else {
        Ok(format!(
            "{} DO UPDATE SET {} WHERE {}",
            insert,
            update_cols.join(", "),
            change_detection.join(" OR ")
        ))
    }
}
