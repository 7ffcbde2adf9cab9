//! Per-value conversion from source representation to target representation.
//!
//! Conversion is idempotent: feeding an already converted value (or the text
//! form PostgreSQL returns for it) through again yields the same value. The
//! validation pass relies on this to compare both sides in one shape.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use super::interval::canonical_interval;
use super::{TargetType, PG_MAX_TIMESTAMP_PRECISION};
use crate::core::{ColumnDescriptor, DecimalText, SqlValue};
use crate::error::{MigrateError, Result};

/// Convert one raw source value to the representation of `target`.
///
/// NULL stays NULL for every target. A value that cannot be represented is a
/// [`MigrateError::Conversion`].
pub fn convert_value(raw: SqlValue, column: &ColumnDescriptor, target: &TargetType) -> Result<SqlValue> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let fail = |message: String| MigrateError::conversion(&column.name, message);

    match target {
        TargetType::Boolean => to_bool(&raw)
            .map(SqlValue::Bool)
            .ok_or_else(|| fail(format!("{:?} is not a boolean (expected 0 or 1)", raw))),

        TargetType::SmallInt => {
            let n = to_integer(&raw).ok_or_else(|| fail(format!("{:?} is not an integer", raw)))?;
            i16::try_from(n)
                .map(SqlValue::I16)
                .map_err(|_| fail(format!("{} out of range for smallint", n)))
        }
        TargetType::Integer => {
            let n = to_integer(&raw).ok_or_else(|| fail(format!("{:?} is not an integer", raw)))?;
            i32::try_from(n)
                .map(SqlValue::I32)
                .map_err(|_| fail(format!("{} out of range for integer", n)))
        }
        TargetType::BigInt => to_integer(&raw)
            .map(SqlValue::I64)
            .ok_or_else(|| fail(format!("{:?} is not an integer", raw))),

        TargetType::Numeric { precision, scale } => {
            let digits = to_decimal_text(&raw).ok_or_else(|| fail(format!("{:?} is not numeric", raw)))?;
            let digits = match precision {
                Some(p) => digits.fit(*p, *scale).map_err(fail)?,
                None => digits,
            };
            Ok(digits.into_value())
        }

        TargetType::Real => to_f64(&raw)
            .map(|f| SqlValue::F32(f as f32))
            .ok_or_else(|| fail(format!("{:?} is not a number", raw))),
        TargetType::DoublePrecision => to_f64(&raw)
            .map(SqlValue::F64)
            .ok_or_else(|| fail(format!("{:?} is not a number", raw))),

        TargetType::Varchar(limit) => {
            let s = text_of(&raw);
            if let Some(n) = limit {
                let len = s.chars().count();
                if len > *n as usize {
                    return Err(fail(format!("{} characters exceed varchar({})", len, n)));
                }
            }
            Ok(SqlValue::Text(s))
        }
        // PostgreSQL pads char(n) on store and strips the padding when cast to text
        TargetType::Char(_) => Ok(SqlValue::Text(text_of(&raw).trim_end_matches(' ').to_string())),
        TargetType::Text | TargetType::Custom(_) => Ok(SqlValue::Text(text_of(&raw))),

        TargetType::Date => to_datetime(&raw)
            .map(|dt| SqlValue::Date(dt.date()))
            .ok_or_else(|| fail(format!("{:?} is not a date", raw))),

        TargetType::Timestamp(p) => to_datetime(&raw)
            .map(|dt| SqlValue::DateTime(dt.round_subsecs(precision_of(*p))))
            .ok_or_else(|| fail(format!("{:?} is not a timestamp", raw))),

        TargetType::TimestampTz(p) => to_datetime_tz(&raw)
            .map(|dt| SqlValue::DateTimeTz(dt.round_subsecs(precision_of(*p))))
            .ok_or_else(|| fail(format!("{:?} is not a timestamp with time zone", raw))),

        TargetType::Bytea => to_bytes(&raw)
            .map(SqlValue::Bytes)
            .ok_or_else(|| fail(format!("{} value cannot be stored as bytea", raw.type_name()))),

        TargetType::Interval => canonical_interval(&text_of(&raw))
            .map(SqlValue::Interval)
            .ok_or_else(|| fail(format!("{:?} is not an interval", raw))),
    }
}

fn precision_of(p: Option<u32>) -> u16 {
    p.unwrap_or(PG_MAX_TIMESTAMP_PRECISION)
        .min(PG_MAX_TIMESTAMP_PRECISION) as u16
}

fn text_of(raw: &SqlValue) -> String {
    raw.to_text().unwrap_or_default()
}

fn to_bool(raw: &SqlValue) -> Option<bool> {
    match raw {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "t" => Some(true),
            "0" | "false" | "f" => Some(false),
            _ => None,
        },
        other => match other.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
    }
}

fn to_integer(raw: &SqlValue) -> Option<i64> {
    match raw {
        SqlValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| Decimal::from_str(s).ok().and_then(|d| SqlValue::Decimal(d).as_i64()))
        }
        SqlValue::F64(f) if f.fract() == 0.0 => f.to_i64(),
        SqlValue::F32(f) if f.fract() == 0.0 => f.to_i64(),
        SqlValue::Bool(b) => Some(i64::from(*b)),
        other => other.as_i64(),
    }
}

/// Exact digits of a numeric input; floats go through [`Decimal`] first.
fn to_decimal_text(raw: &SqlValue) -> Option<DecimalText> {
    match raw {
        SqlValue::Text(s) => DecimalText::parse(s),
        SqlValue::F64(f) => Decimal::from_f64(*f).map(|d| DecimalText::from_decimal(&d)),
        SqlValue::F32(f) => Decimal::from_f32(*f).map(|d| DecimalText::from_decimal(&d)),
        other => other.as_decimal_text(),
    }
}

fn to_f64(raw: &SqlValue) -> Option<f64> {
    match raw {
        SqlValue::F64(f) => Some(*f),
        SqlValue::F32(f) => Some(f64::from(*f)),
        SqlValue::Text(s) | SqlValue::WideDecimal(s) => s.trim().parse().ok(),
        other => other.as_decimal().and_then(|d| d.to_f64()),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_datetime(raw: &SqlValue) -> Option<NaiveDateTime> {
    match raw {
        SqlValue::DateTime(dt) => Some(*dt),
        SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
        SqlValue::DateTimeTz(dt) => Some(dt.naive_local()),
        SqlValue::Text(s) => parse_naive(s),
        _ => None,
    }
}

/// Timestamps with time zone are normalized to UTC; naive inputs are taken as UTC.
fn to_datetime_tz(raw: &SqlValue) -> Option<DateTime<chrono::FixedOffset>> {
    let utc = match raw {
        SqlValue::DateTimeTz(dt) => dt.with_timezone(&Utc),
        SqlValue::Text(s) => {
            let s = s.trim();
            match DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
            {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(_) => Utc.from_utc_datetime(&parse_naive(s)?),
            }
        }
        other => Utc.from_utc_datetime(&to_datetime(other)?),
    };
    Some(utc.fixed_offset())
}

fn to_bytes(raw: &SqlValue) -> Option<Vec<u8>> {
    match raw {
        SqlValue::Bytes(b) => Some(b.clone()),
        // Oracle RAW arrives as bare hex, PostgreSQL bytea text as \x-prefixed hex
        SqlValue::Text(s) => {
            let s = s.trim();
            hex::decode(s.strip_prefix("\\x").unwrap_or(s)).ok()
        }
        _ => None,
    }
}
