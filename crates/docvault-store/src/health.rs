// ABOUTME: Health monitor: verifies layout and critical documents, restoring bad ones from snapshots.
// ABOUTME: Reloads or re-persists affected collections after recovery, takes a fresh backup and logs each check.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Duration;
use docvault_core::health::{DocumentProblem, RECOVERY_LOG_DOCUMENT, RecoveryLogEntry};
use docvault_core::{CriticalDocument, HealthStatus, ParsedDocument, PayloadShape, RecoverySummary};

use crate::backup::BackupScheduler;
use crate::collection::Reloadable;
use crate::engine::{StorageEngine, install_copy};

/// A last backup older than this is reported as a notice.
const STALE_BACKUP_HOURS: i64 = 2;

/// How a document marked for recovery was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Restored { snapshot: String },
    SeededFromBackup,
    CreatedEmpty,
}

pub struct HealthMonitor {
    engine: StorageEngine,
    backups: Arc<BackupScheduler>,
    critical: Vec<CriticalDocument>,
    reloadables: RwLock<Vec<Arc<dyn Reloadable>>>,
    status: Mutex<HealthStatus>,
    check_lock: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    pub fn new(engine: StorageEngine, backups: Arc<BackupScheduler>, critical: Vec<CriticalDocument>) -> Self {
        let status = HealthStatus::pending(engine.now());
        Self {
            engine,
            backups,
            critical,
            reloadables: RwLock::new(Vec::new()),
            status: Mutex::new(status),
            check_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The documents every check verifies: `builders` and `leads`.
    pub fn default_critical() -> Vec<CriticalDocument> {
        vec![
            CriticalDocument::new("builders", PayloadShape::Array),
            CriticalDocument::new("leads", PayloadShape::Array),
        ]
    }

    pub fn critical(&self) -> &[CriticalDocument] {
        &self.critical
    }

    /// Register a cache to reload when its document is restored from a
    /// snapshot, or to write back when its document had to be recreated.
    pub fn register(&self, reloadable: Arc<dyn Reloadable>) {
        if let Ok(mut list) = self.reloadables.write() {
            list.push(reloadable);
        }
    }

    /// The result of the most recent check, without running a new one.
    pub fn health_status(&self) -> HealthStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn force_health_check(&self) -> HealthStatus {
        tracing::info!("forced health check requested");
        self.perform_health_check().await
    }

    /// Run one full check. Never fails: problems become `issues` (unhealthy)
    /// or `notices` (informational) in the returned status.
    pub async fn perform_health_check(&self) -> HealthStatus {
        let _guard = self.check_lock.lock().await;
        let mut issues = Vec::new();
        let mut notices = Vec::new();

        let layout = self.engine.layout().ensure();
        for failure in &layout.failed {
            issues.push(format!("cannot create directory: {failure}"));
        }

        let marked: Vec<(CriticalDocument, DocumentProblem)> = self
            .critical
            .iter()
            .filter_map(|doc| self.inspect(doc).map(|problem| (doc.clone(), problem)))
            .collect();

        let mut summary = RecoverySummary {
            requested: marked.len(),
            ..RecoverySummary::default()
        };
        let mut restored = Vec::new();
        let mut recreated = Vec::new();

        for (doc, problem) in &marked {
            tracing::warn!("critical document {} needs recovery: {:?}", doc.file_name(), problem);
            match self.recover(doc, problem) {
                Ok(Resolution::Restored { snapshot }) => {
                    tracing::info!("recovered {} from {}", doc.file_name(), snapshot);
                    summary.recovered += 1;
                    summary.documents.push(doc.name.clone());
                    restored.push(doc.name.clone());
                }
                Ok(Resolution::SeededFromBackup) => {
                    notices.push(format!(
                        "restored {} from its .backup copy (no snapshot available)",
                        doc.file_name()
                    ));
                    summary.recovered += 1;
                    summary.documents.push(doc.name.clone());
                    recreated.push(doc.name.clone());
                }
                Ok(Resolution::CreatedEmpty) => {
                    notices.push(format!(
                        "created empty {} (no snapshot available)",
                        doc.file_name()
                    ));
                    recreated.push(doc.name.clone());
                }
                Err(issue) => {
                    tracing::error!("{}", issue);
                    issues.push(issue);
                }
            }
        }

        if !restored.is_empty() {
            self.reload_affected(&restored, &mut issues).await;
        }
        if !recreated.is_empty() {
            self.resync_affected(&recreated, &mut issues).await;
        }
        if summary.recovered > 0 {
            match self.backups.perform_full_backup().await {
                Ok(report) => tracing::info!("post-recovery backup {} taken", report.snapshot),
                Err(e) => issues.push(format!("post-recovery backup failed: {e}")),
            }
        }

        self.backup_notices(&mut notices);

        let now = self.engine.now();
        let entry = RecoveryLogEntry {
            last_check: now,
            files_checked: self.critical.len(),
            recovery_needed: summary.requested,
            recovered: summary.recovered,
            status: if !issues.is_empty() {
                "degraded".to_string()
            } else if summary.requested > 0 {
                "recovered".to_string()
            } else {
                "healthy".to_string()
            },
        };
        if let Err(e) = self.engine.write(RECOVERY_LOG_DOCUMENT, &entry) {
            tracing::warn!("failed to write recovery log: {}", e);
        }

        let status = HealthStatus::from_findings(now, issues, notices, summary);
        if status.healthy {
            tracing::info!("health check passed ({} notices)", status.notices.len());
        } else {
            tracing::error!("health check found issues: {:?}", status.issues);
        }

        match self.status.lock() {
            Ok(mut last) => *last = status.clone(),
            Err(poisoned) => *poisoned.into_inner() = status.clone(),
        }
        status
    }

    /// Why `doc` needs recovery, or None if its primary is usable.
    fn inspect(&self, doc: &CriticalDocument) -> Option<DocumentProblem> {
        let path = self.engine.root().join(doc.file_name());
        if !path.is_file() {
            return Some(DocumentProblem::Missing);
        }
        validate_copy(&path, doc.shape).err()
    }

    fn recover(&self, doc: &CriticalDocument, problem: &DocumentProblem) -> Result<Resolution, String> {
        let file = doc.file_name();
        let target = self.engine.root().join(&file);

        let candidates = self.backups.snapshots_containing(&file).unwrap_or_else(|e| {
            tracing::warn!("cannot list snapshots for {}: {}", file, e);
            Vec::new()
        });

        for candidate in candidates {
            if let Err(why) = validate_copy(&candidate, doc.shape) {
                tracing::warn!("skipping unusable snapshot copy {}: {:?}", candidate.display(), why);
                continue;
            }
            install_copy(&candidate, &target)
                .map_err(|e| format!("recovery failed: cannot restore {file}: {e}"))?;
            let snapshot = candidate
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return Ok(Resolution::Restored { snapshot });
        }

        match problem {
            DocumentProblem::Missing => {
                let backup = self
                    .engine
                    .backup_path(&doc.name)
                    .map_err(|e| format!("recovery failed: {file}: {e}"))?;
                if validate_copy(&backup, doc.shape).is_ok() {
                    install_copy(&backup, &target)
                        .map_err(|e| format!("recovery failed: cannot restore {file}: {e}"))?;
                    return Ok(Resolution::SeededFromBackup);
                }
                self.engine
                    .write_value(&doc.name, doc.shape.empty())
                    .map_err(|e| format!("cannot create critical file: {file}: {e}"))?;
                Ok(Resolution::CreatedEmpty)
            }
            DocumentProblem::Unparseable(_) | DocumentProblem::WrongShape(_) => Err(format!(
                "recovery failed: no valid snapshot contains {file}"
            )),
        }
    }

    fn registered_for(&self, documents: &[String]) -> Vec<Arc<dyn Reloadable>> {
        match self.reloadables.read() {
            Ok(list) => list
                .iter()
                .filter(|r| documents.iter().any(|d| d == r.document_name()))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn reload_affected(&self, documents: &[String], issues: &mut Vec<String>) {
        for target in self.registered_for(documents) {
            match target.reload().await {
                Ok(count) => tracing::info!(
                    "reloaded {} with {} records after recovery",
                    target.document_name(),
                    count
                ),
                Err(e) => issues.push(format!(
                    "failed to reload {} after recovery: {e}",
                    target.document_name()
                )),
            }
        }
    }

    /// A recreated document may hold fewer records than a loaded cache, so
    /// loaded caches are written back instead of reloaded.
    async fn resync_affected(&self, documents: &[String], issues: &mut Vec<String>) {
        for target in self.registered_for(documents) {
            match target.resync().await {
                Ok(true) => tracing::info!(
                    "rewrote {} from its cache after recovery",
                    target.document_name()
                ),
                Ok(false) => {}
                Err(e) => issues.push(format!(
                    "failed to rewrite {} after recovery: {e}",
                    target.document_name()
                )),
            }
        }
    }

    fn backup_notices(&self, notices: &mut Vec<String>) {
        match self.backups.list_snapshots() {
            Ok(snapshots) if snapshots.is_empty() => {
                notices.push("no backups available yet".to_string());
            }
            Ok(_) => {
                if let Some(last) = self.backups.last_backup_at()
                    && self.engine.now() - last > Duration::hours(STALE_BACKUP_HOURS)
                {
                    notices.push(format!(
                        "last backup is older than {STALE_BACKUP_HOURS} hours ({last})"
                    ));
                }
            }
            Err(e) => notices.push(format!("cannot list backups: {e}")),
        }
    }
}

/// Check that `path` parses as a document whose payload has `shape`.
fn validate_copy(path: &Path, shape: PayloadShape) -> Result<(), DocumentProblem> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(DocumentProblem::Missing),
        Err(e) => return Err(DocumentProblem::Unparseable(e.to_string())),
    };
    let parsed = ParsedDocument::parse(&contents).map_err(|e| DocumentProblem::Unparseable(e.to_string()))?;
    if shape.matches(&parsed.data) {
        Ok(())
    } else {
        Err(DocumentProblem::WrongShape(shape))
    }
}
