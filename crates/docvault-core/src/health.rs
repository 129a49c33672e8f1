// ABOUTME: Health status and layout report types produced by the health monitor.
// ABOUTME: Separates hard issues (unhealthy) from informational notices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::PayloadShape;

/// Document name of the log written after every health check.
pub const RECOVERY_LOG_DOCUMENT: &str = "_recovery_log";

/// A collection whose primary document must always exist and parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalDocument {
    pub name: String,
    pub shape: PayloadShape,
}

impl CriticalDocument {
    pub fn new(name: impl Into<String>, shape: PayloadShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }
}

/// Why a critical document was marked for recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum DocumentProblem {
    Missing,
    Unparseable(String),
    WrongShape(PayloadShape),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub requested: usize,
    pub recovered: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    /// Hard problems; any entry makes the status unhealthy.
    pub issues: Vec<String>,
    /// Informational findings such as "no backups yet".
    #[serde(default)]
    pub notices: Vec<String>,
    #[serde(default)]
    pub recovery: RecoverySummary,
}

impl HealthStatus {
    /// Status before the first check has run.
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            healthy: true,
            last_check: at,
            issues: Vec::new(),
            notices: vec!["no health check has run yet".to_string()],
            recovery: RecoverySummary::default(),
        }
    }

    pub fn from_findings(
        at: DateTime<Utc>,
        issues: Vec<String>,
        notices: Vec<String>,
        recovery: RecoverySummary,
    ) -> Self {
        Self {
            healthy: issues.is_empty(),
            last_check: at,
            issues,
            notices,
            recovery,
        }
    }
}

/// Outcome of making sure the storage root and its subdirectories exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    /// Directories that could not be created, with the reason.
    pub failed: Vec<String>,
}

impl LayoutReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entry written to `_recovery_log` after every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryLogEntry {
    pub last_check: DateTime<Utc>,
    pub files_checked: usize,
    pub recovery_needed: usize,
    pub recovered: usize,
    pub status: String,
}
