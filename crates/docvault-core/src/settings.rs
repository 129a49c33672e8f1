// ABOUTME: System settings persisted as a single-object document.
// ABOUTME: Defaults keep outbound channels and payments off while backups and recovery stay on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Document name for the settings object.
pub const SETTINGS_DOCUMENT: &str = "system_settings";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default)]
    pub stripe: Toggle,
    #[serde(default)]
    pub razorpay: Toggle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub enabled: bool,
    /// Milliseconds between scheduled snapshots.
    pub interval: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySettings {
    pub enabled: bool,
    pub auto_recover: bool,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_recover: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub smtp: Toggle,
    #[serde(default)]
    pub sms: Toggle,
    #[serde(default)]
    pub payments: PaymentSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fresh_install() {
        let settings = Settings::default();
        assert!(!settings.smtp.enabled);
        assert!(!settings.payments.stripe.enabled);
        assert!(settings.backup.enabled);
        assert_eq!(settings.backup.interval, 3_600_000);
        assert!(settings.recovery.auto_recover);
    }

    #[test]
    fn partial_document_fills_defaults_and_keeps_extras() {
        let raw = r#"{"smtp":{"enabled":true,"host":"mail.local"},"theme":"dark"}"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert!(settings.smtp.enabled);
        assert!(settings.recovery.enabled);
        assert_eq!(settings.extra["theme"], "dark");
    }
}
