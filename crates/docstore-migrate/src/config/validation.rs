//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let migration = &config.migration;

    // Credential references
    if migration.source.is_empty() {
        return Err(MigrateError::Config("migration.source is required".into()));
    }
    if migration.target.is_empty() {
        return Err(MigrateError::Config("migration.target is required".into()));
    }
    for (field, reference) in [("source", &migration.source), ("target", &migration.target)] {
        if !config.credentials.contains_key(reference) {
            return Err(MigrateError::Config(format!(
                "migration.{} refers to unknown credential '{}'",
                field, reference
            )));
        }
    }
    for (name, creds) in &config.credentials {
        if creds.host.is_empty() {
            return Err(MigrateError::Config(format!(
                "credentials.{}.host is required",
                name
            )));
        }
    }

    // Cannot migrate to the same store
    if migration.source == migration.target {
        return Err(MigrateError::Config(
            "source and target cannot be the same store".into(),
        ));
    }
    if let (Some(src), Some(tgt)) = (
        config.credentials.get(&migration.source),
        config.credentials.get(&migration.target),
    ) {
        // File stores live in <root>/<host>; the port does not separate them.
        if src.host == tgt.host {
            return Err(MigrateError::Config(format!(
                "source and target both point at host {}",
                src.host
            )));
        }
    }

    if migration.collections.iter().any(|c| c.trim().is_empty()) {
        return Err(MigrateError::Config(
            "migration.collections must not contain empty names".into(),
        ));
    }

    // Batch loop limits
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.max_batches {
        return Err(MigrateError::Config(
            "migration.max_batches must be at least 1".into(),
        ));
    }
    if migration.time_budget_ms == 0 {
        return Err(MigrateError::Config(
            "migration.time_budget_ms must be positive".into(),
        ));
    }
    if migration.safety_margin_ms >= migration.time_budget_ms {
        return Err(MigrateError::Config(
            "migration.safety_margin_ms must be smaller than time_budget_ms".into(),
        ));
    }
    if migration.progress_interval == 0 {
        return Err(MigrateError::Config(
            "migration.progress_interval must be at least 1".into(),
        ));
    }
    if migration.write_retry.max_attempts == 0 || migration.step_retry.max_attempts == 0 {
        return Err(MigrateError::Config(
            "retry max_attempts must be at least 1".into(),
        ));
    }
    if migration.write_retry.base_delay_ms > migration.write_retry.max_delay_ms {
        return Err(MigrateError::Config(
            "migration.write_retry.base_delay_ms exceeds max_delay_ms".into(),
        ));
    }

    // Connector
    if config.connector.connect_timeout_secs == 0 || config.connector.socket_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "connector timeouts must be positive".into(),
        ));
    }

    Ok(())
}
