// ABOUTME: Backup scheduler: copies every primary document into a timestamped snapshot directory.
// ABOUTME: Writes a manifest per snapshot, prunes beyond the retention count and answers lookups.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use docvault_core::clock::{file_stamp, parse_file_stamp};
use docvault_core::snapshot::{MANIFEST_FILE, RuntimeInfo, SNAPSHOT_PREFIX, format_bytes};
use docvault_core::{BackupManifest, BackupReport, BackupStatus, StoreError};
use serde::Serialize;

use crate::engine::{StorageEngine, write_json_atomic};

/// Snapshot directories kept when no retention is configured.
pub const DEFAULT_RETENTION: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    /// Document files in the snapshot, manifest excluded.
    pub files: Vec<String>,
}

impl SnapshotInfo {
    pub fn contains(&self, file: &str) -> bool {
        self.files.iter().any(|f| f == file)
    }
}

pub struct BackupScheduler {
    engine: StorageEngine,
    retention: usize,
    auto_enabled: AtomicBool,
    last_backup: Mutex<Option<DateTime<Utc>>>,
    run_lock: tokio::sync::Mutex<()>,
    started: Instant,
}

impl BackupScheduler {
    pub fn new(engine: StorageEngine, retention: usize) -> Self {
        Self {
            engine,
            retention: retention.max(1),
            auto_enabled: AtomicBool::new(false),
            last_backup: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
            started: Instant::now(),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.engine.layout().backups_dir()
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled.load(Ordering::SeqCst)
    }

    pub fn set_auto_enabled(&self, enabled: bool) {
        self.auto_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Copy every primary document into a new snapshot directory, write its
    /// manifest, then prune old snapshots. A file that fails to copy is
    /// logged and reported without aborting the rest.
    pub async fn perform_full_backup(&self) -> Result<BackupReport, StoreError> {
        let _guard = self.run_lock.lock().await;
        let now = self.engine.now();

        let backups_dir = self.backups_dir();
        fs::create_dir_all(&backups_dir)?;
        let (snapshot, snapshot_dir) = create_snapshot_dir(&backups_dir, now)?;

        let mut files = Vec::new();
        let mut failed = Vec::new();
        for name in self.engine.list_documents()? {
            let file = format!("{name}.json");
            let source = self.engine.root().join(&file);
            match fs::copy(&source, snapshot_dir.join(&file)) {
                Ok(_) => files.push(file),
                Err(e) => {
                    tracing::warn!("failed to back up {}: {}", file, e);
                    failed.push(format!("{file}: {e}"));
                }
            }
        }

        let manifest = BackupManifest {
            timestamp: now,
            files_backed_up: files.len(),
            files: files.clone(),
            runtime_info: self.runtime_info(),
        };
        write_json_atomic(&snapshot_dir.join(MANIFEST_FILE), &manifest)?;

        if let Ok(mut last) = self.last_backup.lock() {
            *last = Some(now);
        }

        let pruned = self.prune()?;
        tracing::info!(
            "backup {} completed: {} files, {} failed, {} pruned",
            snapshot,
            files.len(),
            failed.len(),
            pruned.len()
        );

        Ok(BackupReport {
            snapshot,
            files_backed_up: files.len(),
            files,
            failed,
            pruned,
        })
    }

    fn runtime_info(&self) -> RuntimeInfo {
        RuntimeInfo {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Delete snapshot directories beyond the retention count, oldest first.
    /// Returns the names removed.
    pub fn prune(&self) -> Result<Vec<String>, StoreError> {
        let names = self.snapshot_names()?;
        let mut pruned = Vec::new();
        for name in names.into_iter().skip(self.retention) {
            match fs::remove_dir_all(self.backups_dir().join(&name)) {
                Ok(()) => {
                    tracing::info!("pruned old backup {}", name);
                    pruned.push(name);
                }
                Err(e) => tracing::warn!("failed to prune backup {}: {}", name, e),
            }
        }
        Ok(pruned)
    }

    /// Snapshot directory names, newest first.
    fn snapshot_names(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.backups_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(SNAPSHOT_PREFIX) && entry.file_type()?.is_dir() {
                names.push(name);
            }
        }
        names.sort_by(|a, b| snapshot_order(b).cmp(&snapshot_order(a)));
        Ok(names)
    }

    /// All snapshots, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, StoreError> {
        let mut snapshots = Vec::new();
        for name in self.snapshot_names()? {
            let path = self.backups_dir().join(&name);
            let mut files = Vec::new();
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                let file = entry.file_name().to_string_lossy().to_string();
                if file.ends_with(".json") && file != MANIFEST_FILE {
                    files.push(file);
                }
            }
            files.sort();

            let created_at = name.strip_prefix(SNAPSHOT_PREFIX).and_then(parse_file_stamp);
            snapshots.push(SnapshotInfo {
                name,
                path,
                created_at,
                files,
            });
        }
        Ok(snapshots)
    }

    /// Paths of `file` inside every snapshot that has it, newest first.
    pub fn snapshots_containing(&self, file: &str) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .list_snapshots()?
            .into_iter()
            .filter(|s| s.contains(file))
            .map(|s| s.path.join(file))
            .collect())
    }

    pub fn find_latest_containing(&self, file: &str) -> Result<Option<PathBuf>, StoreError> {
        Ok(self.snapshots_containing(file)?.into_iter().next())
    }

    pub fn last_backup_at(&self) -> Option<DateTime<Utc>> {
        let recorded = self.last_backup.lock().ok().and_then(|last| *last);
        recorded.or_else(|| {
            self.list_snapshots()
                .ok()
                .and_then(|s| s.into_iter().next())
                .and_then(|s| s.created_at)
        })
    }

    pub fn status(&self) -> Result<BackupStatus, StoreError> {
        let snapshots = self.list_snapshots()?;
        let mut size = 0;
        for snapshot in &snapshots {
            size += dir_size(&snapshot.path)?;
        }

        Ok(BackupStatus {
            total_backups: snapshots.len(),
            latest_backup: snapshots.first().map(|s| s.name.clone()),
            last_backup_at: self.last_backup_at(),
            backup_size_bytes: size,
            backup_size: format_bytes(size),
            auto_backup_enabled: self.auto_enabled(),
        })
    }
}

/// Create `backup_<stamp>`, or `backup_<stamp>-N` if a snapshot was already
/// taken in the same millisecond.
fn create_snapshot_dir(backups_dir: &Path, at: DateTime<Utc>) -> Result<(String, PathBuf), StoreError> {
    let base = format!("{SNAPSHOT_PREFIX}{}", file_stamp(at));
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let path = backups_dir.join(&name);
        match fs::create_dir(&path) {
            Ok(()) => return Ok((name, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Sort key: the timestamp part, then the numeric collision suffix.
pub(crate) fn snapshot_order(name: &str) -> (&str, u32) {
    let rest = name.strip_prefix(SNAPSHOT_PREFIX).unwrap_or(name);
    match (rest.get(..24), rest.get(24..)) {
        (Some(stamp), Some(suffix)) => {
            let n = suffix
                .strip_prefix('-')
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            (stamp, n)
        }
        _ => (rest, 0),
    }
}

fn dir_size(path: &Path) -> Result<u64, StoreError> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
