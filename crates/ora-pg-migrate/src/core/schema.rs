//! Normalized schema descriptors produced by introspection.
//!
//! Descriptors are plain data. Once the introspector hands them out they are
//! never mutated; the planner and converter derive everything else from them.

use serde::{Deserialize, Serialize};

/// A source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Source type name as reported by the catalog, e.g. `NUMBER`, `VARCHAR2`,
    /// `TIMESTAMP(6) WITH TIME ZONE`.
    pub source_type: String,
    /// Character or byte length.
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<i32>,
    pub nullable: bool,
    /// Default expression text exactly as stored by the source.
    pub default: Option<String>,
    /// 1-based position within the table.
    pub ordinal: u32,
}

impl ColumnDescriptor {
    /// Minimal constructor; remaining attributes default to an unconstrained nullable column.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
            ordinal,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: i32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// ON DELETE behavior of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
}

impl ReferentialAction {
    /// Parse Oracle's `DELETE_RULE` column.
    pub fn from_oracle(rule: &str) -> Self {
        match rule.trim().to_uppercase().as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            _ => ReferentialAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

/// Foreign key details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    /// Declared `DEFERRABLE INITIALLY DEFERRED` at the source; always created after the load.
    pub deferred: bool,
    /// Referenced table is outside the selected table set.
    pub external: bool,
}

/// Constraint-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintDetail {
    PrimaryKey,
    Unique,
    Check { condition: String },
    ForeignKey(ForeignKeyRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub name: String,
    /// Constrained columns, in key order. Empty for check constraints.
    pub columns: Vec<String>,
    pub detail: ConstraintDetail,
}

impl ConstraintDescriptor {
    pub fn kind(&self) -> ConstraintKind {
        match self.detail {
            ConstraintDetail::PrimaryKey => ConstraintKind::PrimaryKey,
            ConstraintDetail::Unique => ConstraintKind::Unique,
            ConstraintDetail::Check { .. } => ConstraintKind::Check,
            ConstraintDetail::ForeignKey(_) => ConstraintKind::ForeignKey,
        }
    }

    pub fn foreign_key(&self) -> Option<&ForeignKeyRef> {
        match &self.detail {
            ConstraintDetail::ForeignKey(fk) => Some(fk),
            _ => None,
        }
    }

    /// Shorthand for a foreign key to a table in the same schema.
    pub fn foreign(
        name: impl Into<String>,
        columns: &[&str],
        schema: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            detail: ConstraintDetail::ForeignKey(ForeignKeyRef {
                referenced_schema: schema.into(),
                referenced_table: referenced_table.into(),
                referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
                on_delete: ReferentialAction::NoAction,
                deferred: false,
                external: false,
            }),
        }
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A source table and everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key columns in key order. Empty if the table has no primary key.
    pub primary_key: Vec<String>,
    pub constraints: Vec<ConstraintDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    /// Approximate row count from catalog statistics.
    pub row_count: i64,
}

impl TableDescriptor {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            row_count: 0,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Positions of the primary key columns within a row.
    pub fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// Extract the primary key tuple from a row.
    pub fn key_of(&self, row: &[crate::core::SqlValue]) -> Vec<crate::core::SqlValue> {
        self.key_indices()
            .into_iter()
            .filter_map(|i| row.get(i).cloned())
            .collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ConstraintDescriptor, &ForeignKeyRef)> {
        self.constraints
            .iter()
            .filter_map(|c| c.foreign_key().map(|fk| (c, fk)))
    }
}
