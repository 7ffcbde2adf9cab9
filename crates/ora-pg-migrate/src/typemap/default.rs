//! Column default expression translation.

use tracing::warn;

use super::TargetType;
use crate::core::identifier::escape_literal;
use crate::core::ColumnDescriptor;

/// Translate an Oracle default expression into one PostgreSQL accepts for `target`.
///
/// Returns `None` when there is no default or it cannot be carried over
/// (sequence `NEXTVAL` defaults are dropped with a warning).
pub fn convert_default(column: &ColumnDescriptor, target: &TargetType) -> Option<String> {
    let raw = column.default.as_deref()?.trim();
    let expr = strip_parens(raw);
    if expr.is_empty() || expr.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let upper = expr.to_uppercase();

    if upper.replace('"', "").contains(".NEXTVAL") {
        warn!(
            "Column {}: dropping sequence default '{}' (create an identity or sequence manually)",
            column.name, expr
        );
        return None;
    }

    match upper.as_str() {
        "SYSDATE" | "SYSTIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIMESTAMP" | "LOCALTIMESTAMP" => {
            return Some(match target {
                TargetType::Date => "CURRENT_DATE".to_string(),
                _ => "CURRENT_TIMESTAMP".to_string(),
            });
        }
        "USER" => return Some("CURRENT_USER".to_string()),
        "SYS_GUID()" => {
            return Some(match target {
                TargetType::Bytea => "decode(replace(gen_random_uuid()::text, '-', ''), 'hex')".to_string(),
                t if t.is_character() => "upper(replace(gen_random_uuid()::text, '-', ''))".to_string(),
                _ => "gen_random_uuid()".to_string(),
            });
        }
        _ => {}
    }

    if *target == TargetType::Boolean {
        return match expr.trim_matches('\'') {
            "0" => Some("false".to_string()),
            "1" => Some("true".to_string()),
            other => {
                warn!(
                    "Column {}: default '{}' is not a boolean literal, dropped",
                    column.name, other
                );
                None
            }
        };
    }

    if expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2 {
        return Some(expr.to_string());
    }

    if target.is_character() && !is_numeric_literal(expr) {
        return Some(format!("'{}'", escape_literal(expr)));
    }

    Some(expr.to_string())
}

fn strip_parens(mut s: &str) -> &str {
    while s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        s = s[1..s.len() - 1].trim();
    }
    s
}

fn is_numeric_literal(s: &str) -> bool {
    s.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_default(default: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("C", "VARCHAR2", 1).with_default(default)
    }

    #[test]
    fn test_sysdate_becomes_current_timestamp() {
        let c = with_default("SYSDATE ");
        assert_eq!(
            convert_default(&c, &TargetType::Timestamp(None)).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        let c = with_default("systimestamp");
        assert_eq!(
            convert_default(&c, &TargetType::TimestampTz(None)).as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_user_and_guid() {
        assert_eq!(
            convert_default(&with_default("USER"), &TargetType::Varchar(Some(30))).as_deref(),
            Some("CURRENT_USER")
        );
        let guid = convert_default(&with_default("SYS_GUID()"), &TargetType::Bytea).unwrap();
        assert!(guid.contains("gen_random_uuid()"));
    }

    #[test]
    fn test_sequence_default_dropped() {
        assert_eq!(
            convert_default(&with_default("\"HR\".\"EMP_SEQ\".\"NEXTVAL\""), &TargetType::BigInt),
            None
        );
        assert_eq!(convert_default(&with_default("emp_seq.nextval"), &TargetType::BigInt), None);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            convert_default(&with_default("'ACTIVE'"), &TargetType::Varchar(Some(10))).as_deref(),
            Some("'ACTIVE'")
        );
        assert_eq!(
            convert_default(&with_default("0"), &TargetType::Integer).as_deref(),
            Some("0")
        );
        assert_eq!(
            convert_default(&with_default("1"), &TargetType::Boolean).as_deref(),
            Some("true")
        );
        assert_eq!(
            convert_default(&with_default("N"), &TargetType::Char(1)).as_deref(),
            Some("'N'")
        );
    }

    #[test]
    fn test_null_and_missing_defaults() {
        assert_eq!(convert_default(&with_default("NULL"), &TargetType::Text), None);
        assert_eq!(
            convert_default(&ColumnDescriptor::new("C", "DATE", 1), &TargetType::Timestamp(None)),
            None
        );
    }
}
