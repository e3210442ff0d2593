// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CrewError, Result};
use crate::types::StorageBackend;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CrewError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_controller(cfg)?;
    validate_storage(cfg)?;
    validate_client(cfg)?;
    validate_defaults(cfg)?;
    validate_shutdown(cfg)?;
    Ok(())
}

fn validate_controller(cfg: &RawConfigFile) -> Result<()> {
    if cfg.controller.event_buffer == 0 {
        return Err(CrewError::ConfigError(
            "[controller].event_buffer must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.controller.mailbox_capacity == 0 {
        return Err(CrewError::ConfigError(
            "[controller].mailbox_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage(cfg: &RawConfigFile) -> Result<()> {
    if cfg.storage.backend == StorageBackend::File && cfg.storage.path.trim().is_empty() {
        return Err(CrewError::ConfigError(
            "[storage].path is required when backend = \"file\"".to_string(),
        ));
    }
    if cfg.storage.lease_secs == 0 {
        return Err(CrewError::ConfigError(
            "[storage].lease_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_client(cfg: &RawConfigFile) -> Result<()> {
    if cfg.client.worker_base_url.trim().is_empty() {
        return Err(CrewError::ConfigError(
            "[client].worker_base_url must not be empty".to_string(),
        ));
    }
    if cfg.client.timeout_secs == 0 {
        return Err(CrewError::ConfigError(
            "[client].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    if cfg.defaults.remaining_attempts <= 0 {
        return Err(CrewError::ConfigError(format!(
            "[defaults].remaining_attempts must be >= 1 (got {})",
            cfg.defaults.remaining_attempts
        )));
    }
    if cfg.defaults.error_delay_in_seconds < 0 {
        return Err(CrewError::ConfigError(format!(
            "[defaults].error_delay_in_seconds must not be negative (got {})",
            cfg.defaults.error_delay_in_seconds
        )));
    }
    Ok(())
}

fn validate_shutdown(cfg: &RawConfigFile) -> Result<()> {
    if cfg.shutdown.max_polls == 0 {
        return Err(CrewError::ConfigError(
            "[shutdown].max_polls must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ConfigFile::try_from(RawConfigFile::default()).expect("defaults should validate");
        assert_eq!(cfg.defaults.remaining_attempts, 5);
        assert_eq!(cfg.defaults.error_delay_in_seconds, 60);
        assert_eq!(cfg.shutdown.max_polls, 10);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn zero_mailbox_is_rejected() {
        let mut raw = RawConfigFile::default();
        raw.controller.mailbox_capacity = 0;
        match ConfigFile::try_from(raw) {
            Err(CrewError::ConfigError(msg)) => assert!(msg.contains("mailbox_capacity")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn file_backend_needs_a_path() {
        let mut raw = RawConfigFile::default();
        raw.storage.backend = StorageBackend::File;
        raw.storage.path = "  ".to_string();
        assert!(matches!(ConfigFile::try_from(raw), Err(CrewError::ConfigError(_))));
    }
}
