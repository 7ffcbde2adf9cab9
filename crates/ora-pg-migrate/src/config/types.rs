//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len().max(1);

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (Oracle).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Source database (Oracle) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "oracle").
    #[serde(default = "default_oracle")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Listener port (default: 1521).
    #[serde(default = "default_oracle_port")]
    pub port: u16,

    /// Service name used in the EZConnect descriptor.
    pub service_name: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Owner of the tables to migrate. Oracle stores unquoted names upper-cased.
    pub schema: String,

    /// ODBC driver name as registered in odbcinst.ini.
    #[serde(default = "default_odbc_driver")]
    pub odbc_driver: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service_name", &self.service_name)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("odbc_driver", &self.odbc_driver)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres").
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public"). Created if missing.
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Create schema, tables and indexes; load nothing.
    SchemaOnly,
    /// Load into tables that already exist, then add deferred foreign keys.
    DataOnly,
    /// Schema, data, deferred foreign keys and validation.
    #[default]
    Full,
}

impl RunMode {
    pub fn creates_schema(self) -> bool {
        matches!(self, RunMode::SchemaOnly | RunMode::Full)
    }

    pub fn loads_data(self) -> bool {
        matches!(self, RunMode::DataOnly | RunMode::Full)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::SchemaOnly => "schema_only",
            RunMode::DataOnly => "data_only",
            RunMode::Full => "full",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "schema_only" | "schema" => Ok(RunMode::SchemaOnly),
            "data_only" | "data" => Ok(RunMode::DataOnly),
            "full" => Ok(RunMode::Full),
            other => Err(format!(
                "unknown run mode '{}' (expected schema-only, data-only or full)",
                other
            )),
        }
    }
}

/// Migration behavior configuration.
/// Resource-dependent fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per extracted and loaded batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tables loaded concurrently within a dependency level. Auto-tuned to CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    /// Maximum PostgreSQL connections. Auto-tuned from parallelism if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,

    /// Clear target tables and discard checkpoints before loading.
    #[serde(default)]
    pub truncate_before_load: bool,

    /// Tables to include (glob patterns, case-insensitive). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns, case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Retries per failed batch after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds (default: 200).
    #[serde(default = "default_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// Delay multiplier between consecutive retries (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    /// Upper bound for a single retry delay in milliseconds (default: 30000).
    #[serde(default = "default_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Per-operation timeout for extract, load and catalog calls (default: 300).
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Source type name -> target type text, applied before the rule table.
    #[serde(default)]
    pub type_overrides: BTreeMap<String, String>,

    /// Target type for source types with no rule. Unset means such columns fail their table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_type: Option<String>,

    /// Map NUMBER(1,0) to boolean (default: true).
    #[serde(default = "default_true")]
    pub number1_as_boolean: bool,

    /// Create non-primary-key indexes (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Run the validation pass after a data load (default: true).
    #[serde(default = "default_true")]
    pub validate_after_load: bool,

    /// Keys sampled per table for hash comparison (default: 100).
    #[serde(default = "default_sample_size")]
    pub validation_sample_size: usize,

    /// Mismatched keys recorded per table (default: 10).
    #[serde(default = "default_max_mismatches")]
    pub validation_max_mismatches: usize,

    /// Seed for key sampling, so repeated validations pick the same keys.
    #[serde(default = "default_seed")]
    pub validation_seed: u64,

    /// What `run` does when no mode is given on the command line (default: full).
    #[serde(default)]
    pub mode: RunMode,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallelism: None,
            max_target_connections: None,
            truncate_before_load: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_backoff_base_ms(),
            retry_backoff_multiplier: default_backoff_multiplier(),
            retry_backoff_max_ms: default_backoff_max_ms(),
            operation_timeout_secs: default_operation_timeout(),
            type_overrides: BTreeMap::new(),
            fallback_type: None,
            number1_as_boolean: true,
            create_indexes: true,
            validate_after_load: true,
            validation_sample_size: default_sample_size(),
            validation_max_mismatches: default_max_mismatches(),
            validation_seed: default_seed(),
            mode: RunMode::default(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // One table per core, capped so the source is not flooded with sessions
        let parallelism = *self.parallelism.get_or_insert(cores.clamp(1, 16));

        // Each worker holds one target session; leave headroom for DDL and validation
        if self.max_target_connections.is_none() {
            self.max_target_connections = Some((parallelism + 2).min(64));
        }

        info!(
            "Auto-tuned config: parallelism={}, target_conns={}, batch_size={}",
            parallelism,
            self.get_max_target_connections(),
            self.batch_size,
        );

        self
    }

    // Accessor methods that return the effective value (with fallback defaults)
    // These are used when the config hasn't been auto-tuned yet

    pub fn get_parallelism(&self) -> usize {
        self.parallelism.unwrap_or(4)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections
            .unwrap_or_else(|| self.get_parallelism() + 2)
    }
}

// Default value functions for serde
fn default_oracle() -> String {
    "oracle".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_oracle_port() -> u16 {
    1521
}

fn default_pg_port() -> u16 {
    5432
}

fn default_odbc_driver() -> String {
    "Oracle ODBC Driver".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_operation_timeout() -> u64 {
    300
}

fn default_sample_size() -> usize {
    100
}

fn default_max_mismatches() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}
