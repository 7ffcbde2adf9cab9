//! Row hashing over normalized values.
//!
//! Both sides of a comparison are run through the same type conversion and
//! then rendered with [`SqlValue::to_text`], so equal target values hash
//! equally whichever database they came from.

use sha2::{Digest, Sha256};

use crate::core::SqlValue;

/// Marker hashed in place of NULL. Cannot collide with a rendered value
/// because it contains a NUL byte.
const NULL_MARKER: &[u8] = b"\0NULL";

const COLUMN_SEPARATOR: &[u8] = b"\x1f";

/// SHA-256 of the row, hex encoded.
pub fn row_hash(values: &[SqlValue]) -> String {
    let mut hasher = Sha256::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            hasher.update(COLUMN_SEPARATOR);
        }
        match value.to_text() {
            Some(text) => hasher.update(text.as_bytes()),
            None => hasher.update(NULL_MARKER),
        }
    }
    hex::encode(hasher.finalize())
}

/// Stable text form of a key tuple, used to match rows across sides and in reports.
pub fn key_text(key: &[SqlValue]) -> String {
    key.iter()
        .map(|v| v.to_text().unwrap_or_else(|| "NULL".to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}
