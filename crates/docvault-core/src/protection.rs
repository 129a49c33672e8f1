// ABOUTME: Emergency snapshot file format and reports for the imported-record protection service.
// ABOUTME: Emergency files hold only flagged builders and live outside the snapshot rotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::builder::Builder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyMetadata {
    pub backup_reason: String,
    pub system_version: String,
}

/// Contents of `emergency_backups/backup_<stamp>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencySnapshot {
    pub timestamp: DateTime<Utc>,
    pub record_count: usize,
    pub records: Vec<Builder>,
    pub metadata: EmergencyMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyBackupReport {
    /// None when there was nothing to protect and no file was written.
    pub path: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub source: String,
    pub restored: usize,
    pub already_present: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub healthy: bool,
    pub inspected: usize,
    pub fixed: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStats {
    pub count: usize,
    pub last_backup: Option<String>,
}
