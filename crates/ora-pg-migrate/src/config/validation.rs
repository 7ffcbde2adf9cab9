//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.service_name.is_empty() {
        return Err(MigrateError::Config("source.service_name is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(MigrateError::Config("source.schema is required".into()));
    }
    if config.source.r#type != "oracle" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'oracle', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    let m = &config.migration;
    if m.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = m.parallelism {
        return Err(MigrateError::Config(
            "migration.parallelism must be at least 1".into(),
        ));
    }
    if let Some(0) = m.max_target_connections {
        return Err(MigrateError::Config(
            "migration.max_target_connections must be at least 1".into(),
        ));
    }
    if m.retry_backoff_multiplier < 1.0 || !m.retry_backoff_multiplier.is_finite() {
        return Err(MigrateError::Config(
            "migration.retry_backoff_multiplier must be a finite number >= 1.0".into(),
        ));
    }
    if m.operation_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration.operation_timeout_secs must be at least 1".into(),
        ));
    }
    for (source_type, target_type) in &m.type_overrides {
        if source_type.trim().is_empty() || target_type.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "migration.type_overrides entry '{}: {}' must name both types",
                source_type, target_type
            )));
        }
    }
    if let Some(fallback) = &m.fallback_type {
        if fallback.trim().is_empty() {
            return Err(MigrateError::Config(
                "migration.fallback_type must not be empty when set".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: "oracle".to_string(),
                host: "localhost".to_string(),
                port: 1521,
                service_name: "XEPDB1".to_string(),
                user: "hr".to_string(),
                password: "password".to_string(),
                schema: "HR".to_string(),
                odbc_driver: "Oracle ODBC Driver".to_string(),
            },
            target: TargetConfig {
                r#type: "postgres".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_source_type() {
        let mut config = valid_config();
        config.source.r#type = "mssql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_target_type() {
        let mut config = valid_config();
        config.target.r#type = "oracle".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backoff_multiplier_below_one_rejected() {
        let mut config = valid_config();
        config.migration.retry_backoff_multiplier = 0.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blank_type_override_rejected() {
        let mut config = valid_config();
        config
            .migration
            .type_overrides
            .insert("XMLTYPE".into(), " ".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
