// ABOUTME: Configuration loading and validation for the document vault.
// ABOUTME: Reads DOCVAULT_* environment variables with defaults and rejects unusable values.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("DOCVAULT_BACKUP_RETENTION must be at least 1")]
    ZeroRetention,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Vault configuration. Process inputs, not end-user flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub enabled: bool,
    pub root: PathBuf,
    pub enable_backups: bool,
    pub backup_on_start: bool,
    pub backup_interval: Duration,
    pub backup_retention: usize,
    pub health_interval: Duration,
    pub activity_log_cap: usize,
}

impl VaultConfig {
    /// Defaults for a vault rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            root: root.into(),
            enable_backups: true,
            backup_on_start: false,
            backup_interval: Duration::from_secs(3600),
            backup_retention: 24,
            health_interval: Duration::from_secs(600),
            activity_log_cap: 2000,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - DOCVAULT_ENABLED: run the vault at all (default: true)
    /// - DOCVAULT_ROOT: storage root directory (default: ./data)
    /// - DOCVAULT_ENABLE_BACKUPS: run the scheduled backup loop (default: true)
    /// - DOCVAULT_BACKUP_ON_START: take a snapshot when starting (default: false)
    /// - DOCVAULT_BACKUP_INTERVAL_SECS: seconds between snapshots (default: 3600)
    /// - DOCVAULT_BACKUP_RETENTION: snapshots kept (default: 24)
    /// - DOCVAULT_HEALTH_INTERVAL_SECS: seconds between health checks (default: 600)
    /// - DOCVAULT_ACTIVITY_LOG_CAP: activity log entries kept (default: 2000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new("./data");
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| {
                    let v = v.trim().to_ascii_lowercase();
                    v == "true" || v == "1" || v == "yes"
                })
                .unwrap_or(default)
        };

        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var: key, value }),
                None => Ok(default),
            }
        };

        let backup_interval = number(
            "DOCVAULT_BACKUP_INTERVAL_SECS",
            defaults.backup_interval.as_secs(),
        )?;
        if backup_interval == 0 {
            return Err(ConfigError::ZeroInterval("DOCVAULT_BACKUP_INTERVAL_SECS"));
        }

        let health_interval = number(
            "DOCVAULT_HEALTH_INTERVAL_SECS",
            defaults.health_interval.as_secs(),
        )?;
        if health_interval == 0 {
            return Err(ConfigError::ZeroInterval("DOCVAULT_HEALTH_INTERVAL_SECS"));
        }

        let backup_retention =
            number("DOCVAULT_BACKUP_RETENTION", defaults.backup_retention as u64)? as usize;
        if backup_retention == 0 {
            return Err(ConfigError::ZeroRetention);
        }

        let activity_log_cap =
            number("DOCVAULT_ACTIVITY_LOG_CAP", defaults.activity_log_cap as u64)? as usize;

        Ok(Self {
            enabled: flag("DOCVAULT_ENABLED", defaults.enabled),
            root: get("DOCVAULT_ROOT").map(PathBuf::from).unwrap_or(defaults.root),
            enable_backups: flag("DOCVAULT_ENABLE_BACKUPS", defaults.enable_backups),
            backup_on_start: flag("DOCVAULT_BACKUP_ON_START", defaults.backup_on_start),
            backup_interval: Duration::from_secs(backup_interval),
            backup_retention,
            health_interval: Duration::from_secs(health_interval),
            activity_log_cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<VaultConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VaultConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn config_loads_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, VaultConfig::new("./data"));
        assert!(config.enabled);
        assert_eq!(config.backup_retention, 24);
        assert_eq!(config.backup_interval, Duration::from_secs(3600));
        assert_eq!(config.health_interval, Duration::from_secs(600));
    }

    #[test]
    fn config_reads_overrides() {
        let config = load(&[
            ("DOCVAULT_ENABLED", "no"),
            ("DOCVAULT_ROOT", "/var/lib/docvault"),
            ("DOCVAULT_BACKUP_ON_START", "YES"),
            ("DOCVAULT_BACKUP_INTERVAL_SECS", "60"),
            ("DOCVAULT_BACKUP_RETENTION", "3"),
            ("DOCVAULT_ACTIVITY_LOG_CAP", " 50 "),
        ])
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.root, PathBuf::from("/var/lib/docvault"));
        assert!(config.backup_on_start);
        assert_eq!(config.backup_interval, Duration::from_secs(60));
        assert_eq!(config.backup_retention, 3);
        assert_eq!(config.activity_log_cap, 50);
    }

    #[test]
    fn config_rejects_bad_numbers() {
        let err = load(&[("DOCVAULT_BACKUP_INTERVAL_SECS", "hourly")]).unwrap_err();
        assert!(err.to_string().contains("DOCVAULT_BACKUP_INTERVAL_SECS"));

        assert!(matches!(
            load(&[("DOCVAULT_BACKUP_RETENTION", "0")]),
            Err(ConfigError::ZeroRetention)
        ));
        assert!(matches!(
            load(&[("DOCVAULT_HEALTH_INTERVAL_SECS", "0")]),
            Err(ConfigError::ZeroInterval(_))
        ));
    }
}
