//! Core abstractions shared by every migration component.
//!
//! - [`schema`]: table, column, constraint and index descriptors
//! - [`value`]: SQL value representation
//! - [`numeric`]: exact decimals wider than `rust_decimal`
//! - [`traits`]: source and target collaborator traits
//! - [`identifier`]: identifier quoting for generated SQL

pub mod identifier;
pub mod numeric;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintDetail, ConstraintKind, ForeignKeyRef,
    IndexDescriptor, ReferentialAction, TableDescriptor,
};
pub use traits::{
    OwnedConstraint, ReadFrom, ReadRequest, SourceReader, SourceSession, TargetSession,
    TargetWriter,
};
pub use numeric::DecimalText;
pub use value::{Row, SqlValue};
