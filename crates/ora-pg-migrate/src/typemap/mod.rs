//! Type mapping between Oracle and PostgreSQL.
//!
//! [`TypeMapper::map_type`] is a pure function of the column descriptor and
//! the mapper's configuration: explicit overrides first, then the rule table,
//! then the configured fallback. A type none of them covers is an
//! [`MigrateError::UnsupportedType`] for that table.

mod default;
mod interval;
mod value;

pub use default::convert_default;
pub use value::convert_value;

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::config::MigrationConfig;
use crate::core::{ColumnDescriptor, Row, SqlValue, TableDescriptor};
use crate::error::{MigrateError, Result};

/// Largest length PostgreSQL accepts for `varchar(n)`.
pub const PG_MAX_VARCHAR: u32 = 10_485_760;

/// Highest fractional-second precision PostgreSQL stores.
pub const PG_MAX_TIMESTAMP_PRECISION: u32 = 6;

/// A PostgreSQL column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    /// `numeric`, `numeric(p)` or `numeric(p,s)`. `scale` is only meaningful with a precision.
    Numeric { precision: Option<u32>, scale: u32 },
    Real,
    DoublePrecision,
    Varchar(Option<u32>),
    Char(u32),
    Text,
    Date,
    Timestamp(Option<u32>),
    TimestampTz(Option<u32>),
    Bytea,
    Interval,
    /// Verbatim type text from an override or fallback that has no dedicated variant.
    Custom(String),
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Boolean => f.write_str("boolean"),
            TargetType::SmallInt => f.write_str("smallint"),
            TargetType::Integer => f.write_str("integer"),
            TargetType::BigInt => f.write_str("bigint"),
            TargetType::Numeric { precision: None, .. } => f.write_str("numeric"),
            TargetType::Numeric {
                precision: Some(p),
                scale: 0,
            } => write!(f, "numeric({})", p),
            TargetType::Numeric {
                precision: Some(p),
                scale,
            } => write!(f, "numeric({},{})", p, scale),
            TargetType::Real => f.write_str("real"),
            TargetType::DoublePrecision => f.write_str("double precision"),
            TargetType::Varchar(Some(n)) => write!(f, "varchar({})", n),
            TargetType::Varchar(None) => f.write_str("varchar"),
            TargetType::Char(n) => write!(f, "char({})", n),
            TargetType::Text => f.write_str("text"),
            TargetType::Date => f.write_str("date"),
            TargetType::Timestamp(Some(p)) => write!(f, "timestamp({})", p),
            TargetType::Timestamp(None) => f.write_str("timestamp"),
            TargetType::TimestampTz(Some(p)) => write!(f, "timestamp({}) with time zone", p),
            TargetType::TimestampTz(None) => f.write_str("timestamptz"),
            TargetType::Bytea => f.write_str("bytea"),
            TargetType::Interval => f.write_str("interval"),
            TargetType::Custom(s) => f.write_str(s),
        }
    }
}

impl TargetType {
    /// Parse PostgreSQL type text as written in an override or fallback.
    pub fn parse(text: &str) -> TargetType {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();
        let (base, arg) = split_type_args(&lower);
        let args: Vec<u32> = arg
            .map(|a| a.split(',').filter_map(|p| p.trim().parse().ok()).collect())
            .unwrap_or_default();

        match (base.as_str(), args.as_slice()) {
            ("boolean" | "bool", []) => TargetType::Boolean,
            ("smallint" | "int2", []) => TargetType::SmallInt,
            ("integer" | "int" | "int4", []) => TargetType::Integer,
            ("bigint" | "int8", []) => TargetType::BigInt,
            ("numeric" | "decimal", []) => TargetType::Numeric {
                precision: None,
                scale: 0,
            },
            ("numeric" | "decimal", [p]) => TargetType::Numeric {
                precision: Some(*p),
                scale: 0,
            },
            ("numeric" | "decimal", [p, s]) => TargetType::Numeric {
                precision: Some(*p),
                scale: *s,
            },
            ("real" | "float4", []) => TargetType::Real,
            ("double precision" | "float8", []) => TargetType::DoublePrecision,
            ("varchar" | "character varying", []) => TargetType::Varchar(None),
            ("varchar" | "character varying", [n]) => TargetType::Varchar(Some(*n)),
            ("char" | "character", [n]) => TargetType::Char(*n),
            ("text", []) => TargetType::Text,
            ("date", []) => TargetType::Date,
            ("timestamp" | "timestamp without time zone", []) => TargetType::Timestamp(None),
            ("timestamp" | "timestamp without time zone", [p]) => {
                TargetType::Timestamp(Some(*p))
            }
            ("timestamptz" | "timestamp with time zone", []) => TargetType::TimestampTz(None),
            ("timestamp with time zone", [p]) => TargetType::TimestampTz(Some(*p)),
            ("bytea", []) => TargetType::Bytea,
            ("interval", []) => TargetType::Interval,
            _ => TargetType::Custom(trimmed.to_string()),
        }
    }

    /// Character targets accept any value in its text form.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            TargetType::Varchar(_) | TargetType::Char(_) | TargetType::Text
        )
    }
}

/// Split `numeric(10, 2)` or `timestamp(6) with time zone` into the base name
/// with the parenthesized part removed and the argument text.
fn split_type_args(type_text: &str) -> (String, Option<String>) {
    match (type_text.find('('), type_text.find(')')) {
        (Some(open), Some(close)) if close > open => {
            let base = format!("{}{}", &type_text[..open], &type_text[close + 1..]);
            let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
            (base, Some(type_text[open + 1..close].to_string()))
        }
        _ => (
            type_text.split_whitespace().collect::<Vec<_>>().join(" "),
            None,
        ),
    }
}

/// Maps source column types to target types and converts values accordingly.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    overrides: BTreeMap<String, TargetType>,
    fallback: Option<TargetType>,
    number1_as_boolean: bool,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            fallback: None,
            number1_as_boolean: true,
        }
    }
}

impl TypeMapper {
    /// Build a mapper from the migration settings.
    pub fn from_config(config: &MigrationConfig) -> Self {
        let mut mapper = Self {
            number1_as_boolean: config.number1_as_boolean,
            ..Self::default()
        };
        for (source, target) in &config.type_overrides {
            mapper = mapper.with_override(source, TargetType::parse(target));
        }
        if let Some(fallback) = &config.fallback_type {
            mapper = mapper.with_fallback(TargetType::parse(fallback));
        }
        mapper
    }

    /// Map every column whose source type is `source_type` (full text or base name) to `target`.
    pub fn with_override(mut self, source_type: &str, target: TargetType) -> Self {
        self.overrides
            .insert(source_type.trim().to_uppercase(), target);
        self
    }

    pub fn with_fallback(mut self, target: TargetType) -> Self {
        self.fallback = Some(target);
        self
    }

    pub fn with_number1_as_boolean(mut self, enabled: bool) -> Self {
        self.number1_as_boolean = enabled;
        self
    }

    /// Map one column. `table` only feeds the error.
    pub fn map_type(&self, table: &str, column: &ColumnDescriptor) -> Result<TargetType> {
        let full = column.source_type.trim().to_uppercase();
        let (base, arg) = split_type_args(&full);

        if let Some(target) = self.overrides.get(&full).or_else(|| self.overrides.get(&base)) {
            return Ok(target.clone());
        }

        if let Some(target) = self.rule(&base, arg.as_deref(), column) {
            return Ok(target);
        }

        match &self.fallback {
            Some(fallback) => {
                warn!(
                    "{}.{}: no mapping for {}, using fallback {}",
                    table, column.name, column.source_type, fallback
                );
                Ok(fallback.clone())
            }
            None => Err(MigrateError::UnsupportedType {
                table: table.to_string(),
                column: column.name.clone(),
                source_type: column.source_type.clone(),
            }),
        }
    }

    /// Map every column of a table, in ordinal order.
    pub fn map_table(&self, table: &TableDescriptor) -> Result<Vec<TargetType>> {
        table
            .columns
            .iter()
            .map(|c| self.map_type(&table.name, c))
            .collect()
    }

    fn rule(&self, base: &str, arg: Option<&str>, column: &ColumnDescriptor) -> Option<TargetType> {
        // Oracle reports timestamp precision both inside the type name and as DATA_SCALE
        let fractional = arg
            .and_then(|a| a.trim().parse::<u32>().ok())
            .or_else(|| column.scale.and_then(|s| u32::try_from(s).ok()))
            .map(|p| p.min(PG_MAX_TIMESTAMP_PRECISION));

        let mapped = match base {
            "NUMBER" | "NUMERIC" | "DECIMAL" | "INTEGER" | "INT" | "SMALLINT" => {
                self.map_number(column.precision, column.scale)
            }
            "FLOAT" | "BINARY_DOUBLE" | "DOUBLE PRECISION" => TargetType::DoublePrecision,
            "BINARY_FLOAT" | "REAL" => TargetType::Real,
            "VARCHAR2" | "NVARCHAR2" | "VARCHAR" => match column.length {
                Some(n) if n > 0 => TargetType::Varchar(Some(n.min(PG_MAX_VARCHAR))),
                _ => TargetType::Varchar(None),
            },
            "CHAR" | "NCHAR" => TargetType::Char(column.length.filter(|n| *n > 0).unwrap_or(1)),
            "CLOB" | "NCLOB" | "LONG" => TargetType::Text,
            "DATE" => TargetType::Timestamp(None),
            "TIMESTAMP" => TargetType::Timestamp(fractional),
            "TIMESTAMP WITH TIME ZONE" => TargetType::TimestampTz(fractional),
            "TIMESTAMP WITH LOCAL TIME ZONE" => TargetType::Timestamp(fractional),
            "BLOB" | "RAW" | "LONG RAW" => TargetType::Bytea,
            "ROWID" | "UROWID" => TargetType::Text,
            b if b.starts_with("INTERVAL") => TargetType::Interval,
            _ => return None,
        };
        Some(mapped)
    }

    fn map_number(&self, precision: Option<u32>, scale: Option<i32>) -> TargetType {
        let Some(p) = precision else {
            return TargetType::Numeric {
                precision: None,
                scale: 0,
            };
        };
        match scale.unwrap_or(0) {
            0 if p == 1 && self.number1_as_boolean => TargetType::Boolean,
            0 if p <= 4 => TargetType::SmallInt,
            0 if p <= 9 => TargetType::Integer,
            0 if p <= 18 => TargetType::BigInt,
            0 => TargetType::Numeric {
                precision: Some(p),
                scale: 0,
            },
            // Negative scale rounds to the left of the decimal point: still integral,
            // but with |s| extra digits
            s if s < 0 => TargetType::Numeric {
                precision: Some(p + s.unsigned_abs()),
                scale: 0,
            },
            s => TargetType::Numeric {
                precision: Some(p.max(s.unsigned_abs())),
                scale: s.unsigned_abs(),
            },
        }
    }

    /// Convert one raw source value to the representation of `target`.
    pub fn convert_value(
        &self,
        raw: SqlValue,
        column: &ColumnDescriptor,
        target: &TargetType,
    ) -> Result<SqlValue> {
        convert_value(raw, column, target)
    }

    /// Convert a whole row. `targets` must be the output of [`map_table`](Self::map_table).
    pub fn convert_row(
        &self,
        table: &TableDescriptor,
        targets: &[TargetType],
        row: Row,
    ) -> Result<Row> {
        row.into_iter()
            .zip(table.columns.iter().zip(targets))
            .map(|(value, (column, target))| convert_value(value, column, target))
            .collect()
    }

    /// Translate the column's default expression, if it has one the target can use.
    pub fn convert_default(&self, column: &ColumnDescriptor, target: &TargetType) -> Option<String> {
        convert_default(column, target)
    }
}
