//! Source and target implementations.
//!
//! - [`PgTarget`]: PostgreSQL via deadpool-postgres
//! - `OracleSource`: Oracle via ODBC (feature `oracle`)
//! - [`MemorySource`] / [`MemoryTarget`]: in-process databases for tests and dry runs

pub mod memory;
#[cfg(feature = "oracle")]
pub mod oracle;
pub mod oracle_sql;
pub mod postgres;

pub use memory::{MemorySource, MemoryTarget, TargetEvent};
#[cfg(feature = "oracle")]
pub use oracle::OracleSource;
pub use postgres::PgTarget;
