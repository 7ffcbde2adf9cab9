//! SQL value types for database-agnostic data transfer.
//!
//! Source drivers produce raw values in the shape the source catalog suggests
//! (Oracle `NUMBER` arrives as an integer or a decimal, `DATE` as a timestamp).
//! The type mapper turns them into the shape of the target column.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::numeric::DecimalText;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Exact numeric.
    Decimal(Decimal),
    /// Exact numeric with more digits than [`Decimal`] holds, as plain
    /// decimal text (see [`DecimalText`]).
    WideDecimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    /// Timestamp without time zone.
    DateTime(NaiveDateTime),
    /// Timestamp with a fixed UTC offset.
    DateTimeTz(DateTime<FixedOffset>),
    /// Interval as text. Converted values use the `N mons N days ±HH:MM:SS.ffffff`
    /// form, which PostgreSQL accepts as input.
    Interval(String),
}

/// One row, columns in table ordinal order.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::F32(_) => "f32",
            SqlValue::F64(_) => "f64",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::WideDecimal(_) => "wide_decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Date(_) => "date",
            SqlValue::DateTime(_) => "timestamp",
            SqlValue::DateTimeTz(_) => "timestamptz",
            SqlValue::Interval(_) => "interval",
        }
    }

    /// Exact numeric view of integer and decimal values.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::I16(v) => Some(Decimal::from(*v)),
            SqlValue::I32(v) => Some(Decimal::from(*v)),
            SqlValue::I64(v) => Some(Decimal::from(*v)),
            SqlValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Exact digit view of any numeric value, including wide ones.
    pub fn as_decimal_text(&self) -> Option<DecimalText> {
        match self {
            SqlValue::WideDecimal(s) => DecimalText::parse(s),
            other => other.as_decimal().map(|d| DecimalText::from_decimal(&d)),
        }
    }

    /// Integer view, rejecting decimals with a fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// Total order used for keyset pagination. NULL sorts first; values of
    /// incomparable kinds return `None`.
    pub fn compare(&self, other: &SqlValue) -> Option<Ordering> {
        use SqlValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (F32(a), F32(b)) => a.partial_cmp(b),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Interval(a), Interval(b)) => Some(a.cmp(b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (DateTimeTz(a), DateTimeTz(b)) => Some(a.cmp(b)),
            (Date(a), DateTime(b)) => a.and_hms_opt(0, 0, 0).map(|a| a.cmp(b)),
            (DateTime(a), Date(b)) => b.and_hms_opt(0, 0, 0).map(|b| a.cmp(&b)),
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(a.as_decimal_text()?.cmp_value(&b.as_decimal_text()?)),
            },
        }
    }

    /// Canonical text form, `None` for NULL. Two values that convert to the
    /// same target value always render identically.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            SqlValue::Null => return None,
            SqlValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            SqlValue::I16(n) => n.to_string(),
            SqlValue::I32(n) => n.to_string(),
            SqlValue::I64(n) => n.to_string(),
            SqlValue::F32(n) => n.to_string(),
            SqlValue::F64(n) => n.to_string(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::WideDecimal(s) => s.clone(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => format!("\\x{}", hex::encode(b)),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeTz(dt) => dt.to_rfc3339(),
            SqlValue::Interval(s) => s.clone(),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
