//! Oracle catalog queries, batch statements and text-form value parsing.
//!
//! Everything here is plain string work so it can be exercised without an
//! Oracle client. The ODBC connector in `oracle` sends these statements and
//! feeds the text rows it gets back through [`parse_value`] and the
//! `assemble_*` functions.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};

use crate::core::identifier::{escape_literal, qualify_oracle, quote_oracle};
use crate::core::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintDetail, DecimalText, ForeignKeyRef,
    IndexDescriptor, OwnedConstraint, ReadFrom, ReadRequest, ReferentialAction, SqlValue, TableDescriptor,
};
use crate::error::{MigrateError, Result};

/// One row of text values as returned by the ODBC text buffer.
pub type TextRow = Vec<Option<String>>;

/// Oracle rejects IN lists longer than this.
pub const MAX_IN_LIST: usize = 1000;

/// Largest bucket for `ORA_HASH`, which also bounds the seed.
const ORA_HASH_MAX: u64 = 4_294_967_295;

const DATE_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS";
const TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF6";
const TIMESTAMP_TZ_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF6TZH:TZM";

// === Catalog ===

pub fn schema_exists_sql(owner: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM ALL_USERS WHERE USERNAME = '{}'",
        escape_literal(owner)
    )
}

/// Ordinary heap and index-organized tables, skipping the recycle bin,
/// temporary tables and nested table storage.
pub fn tables_sql(owner: &str) -> String {
    format!(
        "SELECT TABLE_NAME, NVL(NUM_ROWS, 0)
         FROM ALL_TABLES
         WHERE OWNER = '{}'
           AND TEMPORARY = 'N'
           AND NESTED = 'NO'
           AND SECONDARY = 'N'
           AND DROPPED = 'NO'
           AND (IOT_TYPE IS NULL OR IOT_TYPE = 'IOT')
         ORDER BY TABLE_NAME",
        escape_literal(owner)
    )
}

pub fn columns_sql(owner: &str) -> String {
    format!(
        "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE,
                CASE WHEN CHAR_LENGTH > 0 THEN CHAR_LENGTH ELSE DATA_LENGTH END,
                DATA_PRECISION, DATA_SCALE, NULLABLE, DATA_DEFAULT, COLUMN_ID
         FROM ALL_TAB_COLUMNS
         WHERE OWNER = '{}'
         ORDER BY TABLE_NAME, COLUMN_ID",
        escape_literal(owner)
    )
}

pub fn primary_keys_sql(owner: &str) -> String {
    format!(
        "SELECT c.TABLE_NAME, cc.COLUMN_NAME
         FROM ALL_CONSTRAINTS c
         JOIN ALL_CONS_COLUMNS cc
           ON cc.OWNER = c.OWNER AND cc.CONSTRAINT_NAME = c.CONSTRAINT_NAME
         WHERE c.OWNER = '{}' AND c.CONSTRAINT_TYPE = 'P'
         ORDER BY c.TABLE_NAME, cc.POSITION",
        escape_literal(owner)
    )
}

/// Plain B-tree indexes only; function-based and domain indexes have no
/// portable column list.
pub fn indexes_sql(owner: &str) -> String {
    format!(
        "SELECT i.TABLE_NAME, i.INDEX_NAME, i.UNIQUENESS, ic.COLUMN_NAME
         FROM ALL_INDEXES i
         JOIN ALL_IND_COLUMNS ic
           ON ic.INDEX_OWNER = i.OWNER AND ic.INDEX_NAME = i.INDEX_NAME
         WHERE i.TABLE_OWNER = '{}'
           AND i.INDEX_TYPE IN ('NORMAL', 'NORMAL/REV')
         ORDER BY i.TABLE_NAME, i.INDEX_NAME, ic.COLUMN_POSITION",
        escape_literal(owner)
    )
}

/// Enabled unique, check and foreign key constraints with their columns and,
/// for foreign keys, the referenced columns at the same position.
pub fn constraints_sql(owner: &str) -> String {
    format!(
        "SELECT c.TABLE_NAME, c.CONSTRAINT_NAME, c.CONSTRAINT_TYPE, c.SEARCH_CONDITION_VC,
                c.DELETE_RULE, c.DEFERRED, r.OWNER, r.TABLE_NAME, cc.COLUMN_NAME, rc.COLUMN_NAME
         FROM ALL_CONSTRAINTS c
         LEFT JOIN ALL_CONS_COLUMNS cc
           ON cc.OWNER = c.OWNER AND cc.CONSTRAINT_NAME = c.CONSTRAINT_NAME
         LEFT JOIN ALL_CONSTRAINTS r
           ON r.OWNER = c.R_OWNER AND r.CONSTRAINT_NAME = c.R_CONSTRAINT_NAME
         LEFT JOIN ALL_CONS_COLUMNS rc
           ON rc.OWNER = r.OWNER AND rc.CONSTRAINT_NAME = r.CONSTRAINT_NAME
          AND rc.POSITION = cc.POSITION
         WHERE c.OWNER = '{}'
           AND c.CONSTRAINT_TYPE IN ('U', 'C', 'R')
           AND c.STATUS = 'ENABLED'
         ORDER BY c.TABLE_NAME, c.CONSTRAINT_NAME, cc.POSITION",
        escape_literal(owner)
    )
}

fn cell(row: &TextRow, i: usize) -> Option<&str> {
    row.get(i).and_then(|v| v.as_deref())
}

fn cell_string(row: &TextRow, i: usize) -> String {
    cell(row, i).unwrap_or_default().to_string()
}

fn cell_number<T: FromStr>(row: &TextRow, i: usize) -> Option<T> {
    cell(row, i).and_then(|s| s.trim().parse().ok())
}

/// Build table descriptors from the catalog result sets. Tables come back
/// in name order with columns in ordinal order.
pub fn assemble_tables(
    schema: &str,
    tables: &[TextRow],
    columns: &[TextRow],
    primary_keys: &[TextRow],
    indexes: &[TextRow],
) -> Vec<TableDescriptor> {
    let mut by_name: BTreeMap<String, TableDescriptor> = tables
        .iter()
        .map(|row| {
            let mut table = TableDescriptor::new(schema, cell_string(row, 0));
            table.row_count = cell_number(row, 1).unwrap_or(0);
            (table.name.clone(), table)
        })
        .collect();

    for row in columns {
        let Some(table) = by_name.get_mut(cell(row, 0).unwrap_or_default()) else {
            continue;
        };
        let mut column = ColumnDescriptor::new(
            cell_string(row, 1),
            cell_string(row, 2),
            cell_number(row, 8).unwrap_or(table.columns.len() as u32 + 1),
        );
        column.length = cell_number(row, 3).filter(|n: &u32| *n > 0);
        column.precision = cell_number(row, 4);
        column.scale = cell_number(row, 5);
        column.nullable = cell(row, 6) != Some("N");
        column.default = cell(row, 7)
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("NULL"))
            .map(str::to_string);
        table.columns.push(column);
    }

    for row in primary_keys {
        if let Some(table) = by_name.get_mut(cell(row, 0).unwrap_or_default()) {
            table.primary_key.push(cell_string(row, 1));
        }
    }

    for row in indexes {
        let Some(table) = by_name.get_mut(cell(row, 0).unwrap_or_default()) else {
            continue;
        };
        let name = cell_string(row, 1);
        let column = cell_string(row, 3);
        match table.indexes.last_mut() {
            Some(index) if index.name == name => index.columns.push(column),
            _ => table.indexes.push(IndexDescriptor {
                name,
                columns: vec![column],
                unique: cell(row, 2) == Some("UNIQUE"),
            }),
        }
    }

    by_name.into_values().collect()
}

/// Group constraint rows (one per constrained column) into constraints.
pub fn assemble_constraints(rows: &[TextRow]) -> Vec<OwnedConstraint> {
    let mut out: Vec<OwnedConstraint> = Vec::new();
    for row in rows {
        let table = cell_string(row, 0);
        let name = cell_string(row, 1);
        let column = cell(row, 8).map(str::to_string);
        let referenced_column = cell(row, 9).map(str::to_string);

        if let Some(last) = out.last_mut() {
            if last.table == table && last.constraint.name == name {
                if let Some(c) = column.filter(|_| last.constraint.kind() != crate::core::ConstraintKind::Check) {
                    last.constraint.columns.push(c);
                }
                if let ConstraintDetail::ForeignKey(fk) = &mut last.constraint.detail {
                    fk.referenced_columns.extend(referenced_column);
                }
                continue;
            }
        }

        let detail = match cell(row, 2) {
            Some("U") => ConstraintDetail::Unique,
            Some("C") => ConstraintDetail::Check {
                condition: cell_string(row, 3),
            },
            Some("R") => ConstraintDetail::ForeignKey(ForeignKeyRef {
                referenced_schema: cell_string(row, 6),
                referenced_table: cell_string(row, 7),
                referenced_columns: referenced_column.into_iter().collect(),
                on_delete: ReferentialAction::from_oracle(cell(row, 4).unwrap_or_default()),
                deferred: cell(row, 5) == Some("DEFERRED"),
                external: false,
            }),
            _ => continue,
        };
        let columns = match detail {
            ConstraintDetail::Check { .. } => Vec::new(),
            _ => column.into_iter().collect(),
        };
        out.push(OwnedConstraint {
            table,
            constraint: ConstraintDescriptor {
                name,
                columns,
                detail,
            },
        });
    }
    out
}

// === Data ===

fn base_type(column: &ColumnDescriptor) -> String {
    column.source_type.trim().to_uppercase()
}

fn is_numeric(base: &str) -> bool {
    matches!(
        base,
        "NUMBER" | "FLOAT" | "INTEGER" | "SMALLINT" | "DECIMAL" | "NUMERIC" | "BINARY_FLOAT" | "BINARY_DOUBLE"
    )
}

/// Projection for one column that renders it in a locale-independent text form.
pub fn select_expr(column: &ColumnDescriptor) -> Result<String> {
    let quoted = quote_oracle(&column.name)?;
    let base = base_type(column);
    Ok(if base == "DATE" {
        format!("TO_CHAR({}, '{}')", quoted, DATE_FORMAT)
    } else if base.starts_with("TIMESTAMP") && base.ends_with("WITH TIME ZONE") && !base.contains("LOCAL") {
        format!("TO_CHAR({}, '{}')", quoted, TIMESTAMP_TZ_FORMAT)
    } else if base.starts_with("TIMESTAMP") {
        format!("TO_CHAR({}, '{}')", quoted, TIMESTAMP_FORMAT)
    } else if is_numeric(&base) {
        format!("TO_CHAR({}, 'TM9', 'NLS_NUMERIC_CHARACTERS=''.,''')", quoted)
    } else if base == "RAW" {
        format!("RAWTOHEX({})", quoted)
    } else if base.starts_with("INTERVAL") {
        format!("TO_CHAR({})", quoted)
    } else {
        quoted
    })
}

fn select_list<'a>(columns: impl IntoIterator<Item = &'a ColumnDescriptor>) -> Result<String> {
    Ok(columns
        .into_iter()
        .map(select_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn key_columns(table: &TableDescriptor) -> Result<Vec<&ColumnDescriptor>> {
    table
        .primary_key
        .iter()
        .map(|k| {
            table.column(k).ok_or_else(|| {
                MigrateError::Introspection(format!("primary key column {} missing from {}", k, table.name))
            })
        })
        .collect()
}

fn order_by_key(table: &TableDescriptor) -> Result<String> {
    Ok(table
        .primary_key
        .iter()
        .map(|k| quote_oracle(k))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// Literal for a key value inside a generated predicate.
pub fn oracle_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => n.to_string(),
        SqlValue::F64(n) => n.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::WideDecimal(s) => format!("TO_NUMBER('{}')", escape_literal(s)),
        SqlValue::Text(s) | SqlValue::Interval(s) => format!("'{}'", escape_literal(s)),
        SqlValue::Bytes(b) => format!("HEXTORAW('{}')", hex::encode_upper(b)),
        SqlValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        SqlValue::DateTime(dt) => format!(
            "TO_TIMESTAMP('{}', '{}')",
            dt.format("%Y-%m-%d %H:%M:%S%.6f"),
            TIMESTAMP_FORMAT
        ),
        SqlValue::DateTimeTz(dt) => format!(
            "TO_TIMESTAMP_TZ('{}', '{}')",
            dt.format("%Y-%m-%d %H:%M:%S%.6f%:z"),
            TIMESTAMP_TZ_FORMAT
        ),
    }
}

/// `(a > 1) OR (a = 1 AND b > 'x')`: rows strictly after `after` in key order.
pub fn keyset_predicate(table: &TableDescriptor, after: &[SqlValue]) -> Result<String> {
    if after.len() != table.primary_key.len() {
        return Err(MigrateError::State(format!(
            "cursor for {} has {} values, key has {} columns",
            table.name,
            after.len(),
            table.primary_key.len()
        )));
    }
    let quoted: Vec<String> = table
        .primary_key
        .iter()
        .map(|k| quote_oracle(k))
        .collect::<Result<_>>()?;

    let mut terms = Vec::with_capacity(quoted.len());
    for i in 0..quoted.len() {
        let mut parts: Vec<String> = (0..i)
            .map(|j| format!("{} = {}", quoted[j], oracle_literal(&after[j])))
            .collect();
        parts.push(format!("{} > {}", quoted[i], oracle_literal(&after[i])));
        terms.push(format!("({})", parts.join(" AND ")));
    }
    Ok(terms.join(" OR "))
}

/// Statement for one batch. Keyed tables page by key; keyless tables by
/// offset over `ROWID`, which is stable while the table is not reorganized.
pub fn read_batch_sql(request: &ReadRequest<'_>) -> Result<String> {
    let table = request.table;
    let select = format!(
        "SELECT {} FROM {}",
        select_list(&table.columns)?,
        qualify_oracle(&table.schema, &table.name)?
    );
    let n = request.batch_size;

    if !table.has_primary_key() {
        let offset = match &request.from {
            ReadFrom::Offset(rows) => *rows,
            _ => 0,
        };
        return Ok(format!(
            "{} ORDER BY ROWID OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            select, offset, n
        ));
    }

    let order = order_by_key(table)?;
    Ok(match &request.from {
        ReadFrom::Start => format!("{} ORDER BY {} FETCH FIRST {} ROWS ONLY", select, order, n),
        ReadFrom::AfterKey(key) => format!(
            "{} WHERE {} ORDER BY {} FETCH FIRST {} ROWS ONLY",
            select,
            keyset_predicate(table, key)?,
            order,
            n
        ),
        ReadFrom::Offset(rows) => format!(
            "{} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            select, order, rows, n
        ),
    })
}

pub fn count_sql(table: &TableDescriptor) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*) FROM {}",
        qualify_oracle(&table.schema, &table.name)?
    ))
}

/// Pseudo-random but repeatable key sample: rows ordered by a seeded hash of the key.
pub fn sample_keys_sql(table: &TableDescriptor, n: usize, seed: u64) -> Result<String> {
    let keys = key_columns(table)?;
    let hashed = table
        .primary_key
        .iter()
        .map(|k| quote_oracle(k))
        .collect::<Result<Vec<_>>>()?
        .join(" || '|' || ");
    Ok(format!(
        "SELECT {} FROM {} ORDER BY ORA_HASH({}, {}, {}), {} FETCH FIRST {} ROWS ONLY",
        select_list(keys)?,
        qualify_oracle(&table.schema, &table.name)?,
        hashed,
        ORA_HASH_MAX,
        seed % (ORA_HASH_MAX + 1),
        order_by_key(table)?,
        n
    ))
}

/// Rows for up to [`MAX_IN_LIST`] keys.
pub fn fetch_rows_sql(table: &TableDescriptor, keys: &[Vec<SqlValue>]) -> Result<String> {
    let select = format!(
        "SELECT {} FROM {}",
        select_list(&table.columns)?,
        qualify_oracle(&table.schema, &table.name)?
    );
    let predicate = if table.primary_key.len() == 1 {
        let values: Vec<String> = keys
            .iter()
            .filter_map(|k| k.first().map(oracle_literal))
            .collect();
        format!("{} IN ({})", quote_oracle(&table.primary_key[0])?, values.join(", "))
    } else {
        let tuples: Vec<String> = keys
            .iter()
            .map(|k| format!("({})", k.iter().map(oracle_literal).collect::<Vec<_>>().join(", ")))
            .collect();
        format!("({}) IN ({})", order_by_key(table)?, tuples.join(", "))
    };
    Ok(format!("{} WHERE {}", select, predicate))
}

/// Parse one text cell produced by [`select_expr`] into a raw value.
pub fn parse_value(text: Option<&str>, column: &ColumnDescriptor) -> Result<SqlValue> {
    let Some(s) = text else {
        return Ok(SqlValue::Null);
    };
    let fail = |what: &str| MigrateError::conversion(&column.name, format!("{:?} is not a valid {}", s, what));
    let base = base_type(column);

    if base == "BINARY_FLOAT" {
        return s.trim().parse().map(SqlValue::F32).map_err(|_| fail("BINARY_FLOAT"));
    }
    if base == "BINARY_DOUBLE" || (base == "FLOAT" && column.precision.is_none()) {
        return s.trim().parse().map(SqlValue::F64).map_err(|_| fail("BINARY_DOUBLE"));
    }
    if is_numeric(&base) {
        return parse_number(s, column).ok_or_else(|| fail("NUMBER"));
    }
    if base == "DATE" || (base.starts_with("TIMESTAMP") && !base.ends_with("WITH TIME ZONE")) || base.contains("LOCAL") {
        return NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f")
            .map(SqlValue::DateTime)
            .map_err(|_| fail("timestamp"));
    }
    if base.starts_with("TIMESTAMP") {
        return DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f%:z")
            .map(SqlValue::DateTimeTz)
            .map_err(|_| fail("timestamp with time zone"));
    }
    if matches!(base.as_str(), "RAW" | "LONG RAW" | "BLOB") {
        return hex::decode(s.trim()).map(SqlValue::Bytes).map_err(|_| fail("hex string"));
    }
    if base.starts_with("INTERVAL") {
        return Ok(SqlValue::Interval(s.trim().to_string()));
    }
    Ok(SqlValue::Text(s.to_string()))
}

/// `TM9` drops the leading zero (`.5`, `-.5`) and switches to scientific
/// notation past 64 characters. Values wider than `rust_decimal` holds stay as text.
fn parse_number(s: &str, column: &ColumnDescriptor) -> Option<SqlValue> {
    let digits = DecimalText::parse(s)?;

    let integral = column.scale == Some(0) && column.precision.map_or(false, |p| p <= 18);
    if integral {
        if let Ok(n) = digits.to_string().parse::<i64>() {
            return Some(SqlValue::I64(n));
        }
    }
    Some(digits.into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn text(values: &[Option<&str>]) -> TextRow {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    fn orders() -> TableDescriptor {
        let mut t = TableDescriptor::new("SALES", "ORDER_LINES");
        t.columns = vec![
            ColumnDescriptor::new("ORDER_ID", "NUMBER", 1).with_precision(10, 0),
            ColumnDescriptor::new("LINE_NO", "NUMBER", 2).with_precision(5, 0),
            ColumnDescriptor::new("CREATED", "DATE", 3),
            ColumnDescriptor::new("AMOUNT", "NUMBER", 4).with_precision(12, 2),
        ];
        t.primary_key = vec!["ORDER_ID".into(), "LINE_NO".into()];
        t
    }

    #[test]
    fn test_keyset_predicate_expands_composite_key() {
        let predicate = keyset_predicate(&orders(), &[SqlValue::I64(7), SqlValue::I64(3)]).unwrap();
        assert_eq!(
            predicate,
            "(\"ORDER_ID\" > 7) OR (\"ORDER_ID\" = 7 AND \"LINE_NO\" > 3)"
        );
        assert!(keyset_predicate(&orders(), &[SqlValue::I64(7)]).is_err());
    }

    #[test]
    fn test_read_batch_sql() {
        let table = orders();
        let sql = read_batch_sql(&ReadRequest {
            table: &table,
            from: ReadFrom::Start,
            batch_size: 500,
        })
        .unwrap();
        assert!(sql.starts_with("SELECT TO_CHAR(\"ORDER_ID\", 'TM9'"));
        assert!(sql.contains("TO_CHAR(\"CREATED\", 'YYYY-MM-DD HH24:MI:SS')"));
        assert!(sql.contains("FROM \"SALES\".\"ORDER_LINES\""));
        assert!(sql.ends_with("ORDER BY \"ORDER_ID\", \"LINE_NO\" FETCH FIRST 500 ROWS ONLY"));

        let mut keyless = table.clone();
        keyless.primary_key.clear();
        let sql = read_batch_sql(&ReadRequest {
            table: &keyless,
            from: ReadFrom::Offset(1000),
            batch_size: 500,
        })
        .unwrap();
        assert!(sql.ends_with("ORDER BY ROWID OFFSET 1000 ROWS FETCH NEXT 500 ROWS ONLY"));
    }

    #[test]
    fn test_sample_keys_sql_is_seeded() {
        let sql = sample_keys_sql(&orders(), 100, 42).unwrap();
        assert!(sql.contains("ORA_HASH(\"ORDER_ID\" || '|' || \"LINE_NO\", 4294967295, 42)"));
        assert!(sql.ends_with("FETCH FIRST 100 ROWS ONLY"));
    }

    #[test]
    fn test_fetch_rows_sql() {
        let mut single = orders();
        single.primary_key = vec!["ORDER_ID".into()];
        let sql = fetch_rows_sql(&single, &[vec![SqlValue::I64(1)], vec![SqlValue::I64(2)]]).unwrap();
        assert!(sql.ends_with("WHERE \"ORDER_ID\" IN (1, 2)"));

        let sql = fetch_rows_sql(&orders(), &[vec![SqlValue::I64(1), SqlValue::I64(2)]]).unwrap();
        assert!(sql.ends_with("WHERE (\"ORDER_ID\", \"LINE_NO\") IN ((1, 2))"));
    }

    #[test]
    fn test_parse_values() {
        let table = orders();
        assert_eq!(parse_value(Some("42"), &table.columns[0]).unwrap(), SqlValue::I64(42));
        assert_eq!(
            parse_value(Some(".5"), &table.columns[3]).unwrap(),
            SqlValue::Decimal(Decimal::from_str("0.5").unwrap())
        );
        assert_eq!(
            parse_value(Some("2024-01-15 10:30:00"), &table.columns[2])
                .unwrap()
                .to_text()
                .as_deref(),
            Some("2024-01-15 10:30:00")
        );
        assert_eq!(parse_value(None, &table.columns[2]).unwrap(), SqlValue::Null);
        assert!(parse_value(Some("abc"), &table.columns[3]).is_err());

        let wide = ColumnDescriptor::new("BIG_ID", "NUMBER", 1).with_precision(38, 0);
        assert_eq!(
            parse_value(Some("12345678901234567890123456789012"), &wide).unwrap(),
            SqlValue::WideDecimal("12345678901234567890123456789012".into())
        );
        assert_eq!(
            parse_value(Some("1.5E+40"), &wide).unwrap().to_text().as_deref(),
            Some(format!("15{}", "0".repeat(39)).as_str())
        );

        let raw = ColumnDescriptor::new("TOKEN", "RAW", 1).with_length(2);
        assert_eq!(parse_value(Some("DEAD"), &raw).unwrap(), SqlValue::Bytes(vec![0xde, 0xad]));

        let tz = ColumnDescriptor::new("AT", "TIMESTAMP(6) WITH TIME ZONE", 1);
        assert!(matches!(
            parse_value(Some("2024-01-15 10:30:00.000000+02:00"), &tz).unwrap(),
            SqlValue::DateTimeTz(_)
        ));
    }

    #[test]
    fn test_assemble_tables() {
        let tables = vec![text(&[Some("EMPLOYEES"), Some("14")]), text(&[Some("DEPARTMENTS"), None])];
        let columns = vec![
            text(&[Some("EMPLOYEES"), Some("ID"), Some("NUMBER"), Some("22"), Some("10"), Some("0"), Some("N"), None, Some("1")]),
            text(&[Some("EMPLOYEES"), Some("NAME"), Some("VARCHAR2"), Some("100"), None, None, Some("Y"), Some("'n/a' "), Some("2")]),
            text(&[Some("DEPARTMENTS"), Some("ID"), Some("NUMBER"), Some("22"), None, None, Some("N"), Some("NULL"), Some("1")]),
        ];
        let pks = vec![text(&[Some("EMPLOYEES"), Some("ID")])];
        let indexes = vec![
            text(&[Some("EMPLOYEES"), Some("EMP_NAME_IX"), Some("NONUNIQUE"), Some("NAME")]),
            text(&[Some("EMPLOYEES"), Some("EMP_NAME_IX"), Some("NONUNIQUE"), Some("ID")]),
        ];

        let out = assemble_tables("HR", &tables, &columns, &pks, &indexes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "DEPARTMENTS");
        assert_eq!(out[0].row_count, 0);
        assert_eq!(out[0].columns[0].default, None);

        let emp = &out[1];
        assert_eq!(emp.row_count, 14);
        assert_eq!(emp.primary_key, vec!["ID"]);
        assert!(!emp.columns[0].nullable);
        assert_eq!(emp.columns[1].default.as_deref(), Some("'n/a'"));
        assert_eq!(emp.indexes[0].columns, vec!["NAME", "ID"]);
        assert!(!emp.indexes[0].unique);
    }

    #[test]
    fn test_assemble_constraints() {
        let rows = vec![
            text(&[Some("EMPLOYEES"), Some("EMP_DEPT_FK"), Some("R"), None, Some("CASCADE"), Some("IMMEDIATE"), Some("HR"), Some("DEPARTMENTS"), Some("DEPT_ID"), Some("ID")]),
            text(&[Some("EMPLOYEES"), Some("EMP_SAL_CK"), Some("C"), Some("SALARY > 0"), None, Some("IMMEDIATE"), None, None, Some("SALARY"), None]),
            text(&[Some("EMPLOYEES"), Some("EMP_UK"), Some("U"), None, None, Some("IMMEDIATE"), None, None, Some("EMAIL"), None]),
            text(&[Some("EMPLOYEES"), Some("EMP_UK"), Some("U"), None, None, Some("IMMEDIATE"), None, None, Some("ORG"), None]),
        ];
        let out = assemble_constraints(&rows);
        assert_eq!(out.len(), 3);

        let fk = out[0].constraint.foreign_key().unwrap();
        assert_eq!(fk.referenced_table, "DEPARTMENTS");
        assert_eq!(fk.referenced_columns, vec!["ID"]);
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert!(!fk.deferred);

        assert!(out[1].constraint.columns.is_empty());
        assert_eq!(
            out[1].constraint.detail,
            ConstraintDetail::Check {
                condition: "SALARY > 0".into()
            }
        );
        assert_eq!(out[2].constraint.columns, vec!["EMAIL", "ORG"]);
    }
}
