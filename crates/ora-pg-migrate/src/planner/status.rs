//! Per-table lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a table is in the migration.
///
/// `PENDING -> SCHEMA_CREATED -> DATA_LOADING -> DATA_LOADED -> VALIDATED`,
/// with `FAILED` reachable from any non-terminal state. Data-only runs go
/// straight from `PENDING` to `DATA_LOADING`; schema-only runs stop at
/// `SCHEMA_CREATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Pending,
    SchemaCreated,
    DataLoading,
    DataLoaded,
    Validated,
    Failed,
}

impl TableStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TableStatus::Validated | TableStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: TableStatus) -> bool {
        use TableStatus::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, SchemaCreated)
            | (Pending, DataLoading)
            | (SchemaCreated, DataLoading)
            | (DataLoading, DataLoaded)
            | (DataLoaded, Validated) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TableStatus::Pending => "PENDING",
            TableStatus::SchemaCreated => "SCHEMA_CREATED",
            TableStatus::DataLoading => "DATA_LOADING",
            TableStatus::DataLoaded => "DATA_LOADED",
            TableStatus::Validated => "VALIDATED",
            TableStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::TableStatus::*;

    #[test]
    fn test_happy_path() {
        assert!(Pending.can_transition_to(SchemaCreated));
        assert!(SchemaCreated.can_transition_to(DataLoading));
        assert!(DataLoading.can_transition_to(DataLoaded));
        assert!(DataLoaded.can_transition_to(Validated));
    }

    #[test]
    fn test_data_only_shortcut() {
        assert!(Pending.can_transition_to(DataLoading));
    }

    #[test]
    fn test_failed_from_non_terminal_only() {
        for s in [Pending, SchemaCreated, DataLoading, DataLoaded] {
            assert!(s.can_transition_to(Failed));
        }
        assert!(!Validated.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_illegal_steps() {
        assert!(!Pending.can_transition_to(DataLoaded));
        assert!(!DataLoaded.can_transition_to(DataLoading));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Validated.can_transition_to(Pending));
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&DataLoaded).unwrap(), "\"DATA_LOADED\"");
        assert_eq!(SchemaCreated.to_string(), "SCHEMA_CREATED");
    }
}
