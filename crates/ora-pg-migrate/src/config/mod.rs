//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(MigrateError::Config("configuration file is empty".into()));
        }
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    ///
    /// Auto-tuned resource fields and the run mode are excluded so a resume
    /// on a different machine, or in another mode, still matches the
    /// checkpoints it is continuing.
    pub fn hash(&self) -> String {
        let mut stable = self.clone();
        stable.migration.parallelism = None;
        stable.migration.max_target_connections = None;
        stable.migration.mode = RunMode::default();
        let yaml = serde_yaml::to_string(&stable).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl SourceConfig {
    /// Build an ODBC connection string using an EZConnect descriptor.
    pub fn connection_string(&self) -> String {
        format!(
            "Driver={{{}}};DBQ={}:{}/{};UID={};PWD={};",
            self.odbc_driver, self.host, self.port, self.service_name, self.user, self.password
        )
    }
}

impl TargetConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            self.host, self.port, self.database, self.user, self.password, self.ssl_mode
        )
    }
}
