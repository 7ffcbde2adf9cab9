//! Identifier validation and quoting for generated SQL.
//!
//! Identifiers cannot be bound as statement parameters, so every table,
//! column and schema name that reaches a statement goes through these helpers.

use crate::error::{MigrateError, Result};

/// Oracle allows 128-byte identifiers since 12.2.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1.
pub const PG_MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, preserving case.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Schema-qualified PostgreSQL table name.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote an Oracle identifier. Oracle uses the same double-quote rules.
pub fn quote_oracle(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

pub fn qualify_oracle(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_oracle(schema)?, quote_oracle(table)?))
}

/// Comma-separated quoted PostgreSQL column list.
pub fn pg_column_list(columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// Name for a derived object such as an index or constraint: `<table>_<name>`,
/// lower-cased and cut to PostgreSQL's identifier limit on a char boundary.
pub fn derived_pg_name(table: &str, name: &str) -> String {
    let full = format!("{}_{}", table, name).to_lowercase();
    if full.len() <= PG_MAX_IDENTIFIER_LENGTH {
        return full;
    }
    let mut end = PG_MAX_IDENTIFIER_LENGTH;
    while !full.is_char_boundary(end) {
        end -= 1;
    }
    full[..end].to_string()
}

/// Escape a string for use inside a single-quoted SQL literal.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_pg() {
        assert_eq!(quote_pg("EMPLOYEES").unwrap(), "\"EMPLOYEES\"");
        assert_eq!(quote_pg("odd\"name").unwrap(), "\"odd\"\"name\"");
    }

    #[test]
    fn test_rejects_empty_and_null_byte() {
        assert!(quote_pg("").is_err());
        assert!(quote_pg("bad\0name").is_err());
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify_pg("public", "ORDERS").unwrap(), "\"public\".\"ORDERS\"");
        assert_eq!(qualify_oracle("HR", "EMPLOYEES").unwrap(), "\"HR\".\"EMPLOYEES\"");
    }

    #[test]
    fn test_derived_name_truncated() {
        let long = "X".repeat(80);
        let name = derived_pg_name("ORDERS", &long);
        assert_eq!(name.len(), PG_MAX_IDENTIFIER_LENGTH);
        assert!(name.starts_with("orders_x"));
        assert_eq!(derived_pg_name("ORDERS", "IDX_DATE"), "orders_idx_date");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
    }
}
