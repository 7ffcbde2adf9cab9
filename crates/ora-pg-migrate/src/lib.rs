//! # ora-pg-migrate
//!
//! Oracle to PostgreSQL schema and data migration library.
//!
//! This library moves a whole Oracle schema into PostgreSQL:
//!
//! - **Introspection** of tables, columns, keys, constraints and indexes
//! - **Type mapping** from Oracle types to PostgreSQL types, with overrides
//! - **Dependency ordering** so foreign-key targets load first; cyclic keys
//!   are added after the data
//! - **Parallel batched loads** with retries and per-batch checkpoints
//! - **Resume capability** via signed JSON checkpoint files
//! - **Validation** by row counts and sampled row hashes
//!
//! ## Example
//!
//! ```rust,no_run
//! use ora_pg_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> ora_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let mode = config.migration.mode;
//!     let schema = config.source.schema.clone();
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let mut plan = orchestrator.build_plan(&schema).await?;
//!     let report = orchestrator.run(&mut plan, mode).await?;
//!     println!("{}: {} rows", report.outcome, report.rows_migrated);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod ddl;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod orchestrator;
pub mod planner;
pub mod state;
pub mod transfer;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, RunMode, SourceConfig, TargetConfig};
pub use crate::core::{ColumnDescriptor, Row, SqlValue, TableDescriptor};
pub use ddl::SchemaConverter;
pub use error::{ErrorKind, MigrateError, Result};
pub use introspect::SchemaIntrospector;
pub use orchestrator::{HealthCheckResult, MigrationReport, Orchestrator, RunOutcome};
pub use planner::{DependencyPlanner, MigrationPlan, TableStatus};
pub use state::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use transfer::{DataMigrator, RetryPolicy};
pub use typemap::{TargetType, TypeMapper};
pub use verify::{ValidationEngine, ValidationReport};
