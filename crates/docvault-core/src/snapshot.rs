// ABOUTME: Types describing scheduled snapshots: manifest, per-run report and rotation status.
// ABOUTME: Also formats byte counts for the human-readable backup status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix shared by snapshot directories and emergency backup files.
pub const SNAPSHOT_PREFIX: &str = "backup_";

/// Name of the manifest written into every snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub crate_version: String,
    pub os: String,
    pub arch: String,
    pub pid: u32,
    pub uptime_secs: u64,
}

/// `manifest.json` inside a snapshot directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub files_backed_up: usize,
    pub files: Vec<String>,
    pub runtime_info: RuntimeInfo,
}

/// What one `perform_full_backup` run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub snapshot: String,
    pub files_backed_up: usize,
    pub files: Vec<String>,
    /// Files that could not be copied, with the reason.
    pub failed: Vec<String>,
    /// Snapshot directories removed by retention.
    pub pruned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub total_backups: usize,
    pub latest_backup: Option<String>,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub backup_size_bytes: u64,
    pub backup_size: String,
    pub auto_backup_enabled: bool,
}

/// Render a byte count with binary units, two decimals at most: `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
