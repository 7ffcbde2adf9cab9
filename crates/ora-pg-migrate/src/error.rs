//! Error types for the migration library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target unreachable, or a session dropped mid-operation.
    #[error("Connectivity error ({endpoint}): {message}")]
    Connectivity { endpoint: String, message: String },

    /// Source schema missing or catalog metadata unreadable.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// No mapping rule, override or fallback for a source column type.
    #[error("Unsupported type {source_type} for column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        source_type: String,
    },

    /// A value could not be converted to its target type.
    #[error("Cannot convert value for column {column}: {message}")]
    Conversion { column: String, message: String },

    /// Target rejected a batch because of a key, foreign key, not-null or check violation.
    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    /// An operation did not complete within the configured timeout.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Post-load comparison found differences.
    #[error("Validation mismatch for {table}: {message}")]
    ValidationMismatch { table: String, message: String },

    /// A table this one depends on did not load.
    #[error("Table {table} skipped: dependency {dependency} did not load")]
    DependencyFailed { table: String, dependency: String },

    /// Target database error not classified as connectivity or constraint.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Checkpoint state error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since the checkpoints were written - cannot resume. Run a fresh migration instead.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

/// Serializable error classification carried in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connectivity,
    Introspection,
    UnsupportedType,
    Conversion,
    ConstraintViolation,
    Timeout,
    ValidationMismatch,
    DependencyFailed,
    Target,
    State,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// Process exit code for the CLI.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 1,
            ErrorKind::Connectivity => 2,
            ErrorKind::Introspection => 3,
            ErrorKind::UnsupportedType | ErrorKind::Conversion => 4,
            ErrorKind::ValidationMismatch => 5,
            ErrorKind::Cancelled => 130,
            ErrorKind::Io => 7,
            ErrorKind::State => 8,
            _ => 6,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Introspection => "introspection",
            ErrorKind::UnsupportedType => "unsupported_type",
            ErrorKind::Conversion => "conversion",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ValidationMismatch => "validation_mismatch",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::Target => "target",
            ErrorKind::State => "state",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Connectivity error for the named endpoint ("source" or "target").
    pub fn connectivity(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connectivity {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Conversion {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::ConstraintViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        MigrateError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::ConfigChanged => {
                ErrorKind::Config
            }
            MigrateError::Connectivity { .. } | MigrateError::Pool { .. } => {
                ErrorKind::Connectivity
            }
            MigrateError::Introspection(_) => ErrorKind::Introspection,
            MigrateError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            MigrateError::Conversion { .. } => ErrorKind::Conversion,
            MigrateError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            MigrateError::Timeout { .. } => ErrorKind::Timeout,
            MigrateError::ValidationMismatch { .. } => ErrorKind::ValidationMismatch,
            MigrateError::DependencyFailed { .. } => ErrorKind::DependencyFailed,
            MigrateError::Target(_) => ErrorKind::Target,
            MigrateError::State(_) | MigrateError::Json(_) => ErrorKind::State,
            MigrateError::Io(_) => ErrorKind::Io,
            MigrateError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a failed batch may be rolled back and attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrateError::Connectivity { .. }
                | MigrateError::Pool { .. }
                | MigrateError::ConstraintViolation { .. }
                | MigrateError::Timeout { .. }
        )
    }

    /// Whether this error aborts the whole run rather than a single table.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connectivity | ErrorKind::Introspection | ErrorKind::Config
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
