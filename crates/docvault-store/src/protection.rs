// ABOUTME: Data protection service for externally imported builders.
// ABOUTME: Emergency snapshots outside the rotation, union restore, and provenance flag repair.

use std::fs;
use std::path::{Path, PathBuf};

use docvault_core::clock::file_stamp;
use docvault_core::protection::{
    EmergencyBackupReport, EmergencyMetadata, EmergencySnapshot, ProtectionStats, RestoreReport,
    VerifyReport,
};
use docvault_core::snapshot::SNAPSHOT_PREFIX;
use docvault_core::{Builder, CollectionError, IMPORT_SOURCE, StoreError};

use crate::backup::snapshot_order;
use crate::collection::Collection;
use crate::engine::{StorageEngine, write_json_atomic};

const BACKUP_REASON: &str = "emergency protection of imported builders";

pub struct DataProtection {
    engine: StorageEngine,
    builders: Collection<Builder>,
}

impl DataProtection {
    pub fn new(engine: StorageEngine, builders: Collection<Builder>) -> Self {
        Self { engine, builders }
    }

    pub fn emergency_dir(&self) -> PathBuf {
        self.engine.layout().emergency_dir()
    }

    /// Write every protected builder to a new emergency file. Nothing is
    /// written when no builder is protected.
    pub async fn create_emergency_backup(&self) -> Result<EmergencyBackupReport, CollectionError> {
        let records: Vec<Builder> = self
            .builders
            .list()
            .await?
            .into_iter()
            .filter(Builder::is_protected)
            .collect();

        if records.is_empty() {
            tracing::info!("no imported builders to protect; emergency backup skipped");
            return Ok(EmergencyBackupReport {
                path: None,
                count: 0,
            });
        }

        let now = self.engine.now();
        let snapshot = EmergencySnapshot {
            timestamp: now,
            record_count: records.len(),
            records,
            metadata: EmergencyMetadata {
                backup_reason: BACKUP_REASON.to_string(),
                system_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let dir = self.emergency_dir();
        fs::create_dir_all(&dir).map_err(StoreError::from)?;
        let path = unused_path(&dir, &format!("{SNAPSHOT_PREFIX}{}", file_stamp(now)));
        write_json_atomic(&path, &snapshot)?;

        tracing::info!(
            "emergency backup of {} builders written to {}",
            snapshot.record_count,
            path.display()
        );
        Ok(EmergencyBackupReport {
            path: Some(path.display().to_string()),
            count: snapshot.record_count,
        })
    }

    /// Emergency file paths, newest first.
    pub fn emergency_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.emergency_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json")
                && stem.starts_with(SNAPSHOT_PREFIX)
            {
                files.push((stem.to_string(), entry.path()));
            }
        }
        files.sort_by(|(a, _), (b, _)| snapshot_order(b).cmp(&snapshot_order(a)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Insert every record of the newest emergency file whose id is not in
    /// the live collection. Existing records are never overwritten.
    pub async fn restore_from_latest_backup(&self) -> Result<RestoreReport, CollectionError> {
        let latest = self
            .emergency_backups()?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Recovery("no emergency backups available".to_string()))?;

        let contents = fs::read_to_string(&latest).map_err(StoreError::from)?;
        let snapshot: EmergencySnapshot = serde_json::from_str(&contents)?;
        let source = file_name(&latest);

        let mut report = RestoreReport {
            source,
            restored: 0,
            already_present: 0,
            failed: 0,
        };
        for record in snapshot.records {
            let label = record.company_name.clone();
            match self.builders.insert_if_absent(record).await {
                Ok(true) => report.restored += 1,
                Ok(false) => report.already_present += 1,
                Err(e) => {
                    tracing::error!("failed to restore builder {}: {}", label, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "restored {} builders from {} ({} already present, {} failed)",
            report.restored,
            report.source,
            report.already_present,
            report.failed
        );
        Ok(report)
    }

    /// Normalize provenance flags on imported builders so they stay
    /// recognizable and protected.
    pub async fn verify_and_fix(&self) -> Result<VerifyReport, CollectionError> {
        let inspected = self
            .builders
            .list()
            .await?
            .iter()
            .filter(|b| b.is_externally_imported())
            .count();

        let fixed = self
            .builders
            .modify_where(|b| {
                if !b.is_externally_imported() {
                    return false;
                }
                let mut changed = false;
                if !b.gmb_imported && !b.imported_from_gmb {
                    b.gmb_imported = true;
                    b.imported_from_gmb = true;
                    changed = true;
                }
                if b.source.is_none() {
                    b.source = Some(IMPORT_SOURCE.to_string());
                    changed = true;
                }
                if !b.preserve_data {
                    b.preserve_data = true;
                    changed = true;
                }
                changed
            })
            .await?;

        let mut issues = Vec::new();
        if inspected == 0 {
            issues.push("no imported builders found; possible data loss".to_string());
        }

        if issues.is_empty() {
            tracing::info!("imported builder check passed: {} inspected, {} fixed", inspected, fixed);
        } else {
            tracing::warn!("imported builder check found issues: {:?}", issues);
        }

        Ok(VerifyReport {
            healthy: issues.is_empty(),
            inspected,
            fixed,
            issues,
        })
    }

    pub async fn stats(&self) -> Result<ProtectionStats, CollectionError> {
        let count = self
            .builders
            .list()
            .await?
            .iter()
            .filter(|b| b.is_externally_imported())
            .count();
        let last_backup = self.emergency_backups()?.first().map(|p| file_name(p));
        Ok(ProtectionStats { count, last_backup })
    }
}

fn unused_path(dir: &Path, stem: &str) -> PathBuf {
    let mut path = dir.join(format!("{stem}.json"));
    let mut attempt = 1;
    while path.exists() {
        path = dir.join(format!("{stem}-{attempt}.json"));
        attempt += 1;
    }
    path
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
