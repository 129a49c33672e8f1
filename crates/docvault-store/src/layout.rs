// ABOUTME: Filesystem layout of a storage root: primaries, snapshot and emergency backup directories.
// ABOUTME: Provides the idempotent ensure step and the advisory single-writer owner marker.

use std::fs;
use std::path::{Path, PathBuf};

use docvault_core::{LayoutReport, StoreError};

/// Subdirectory holding scheduled snapshots.
pub const BACKUPS_DIR: &str = "backups";

/// Subdirectory holding emergency snapshots of protected records.
pub const EMERGENCY_DIR: &str = "emergency_backups";

/// Advisory marker naming the process that currently owns the root.
pub const OWNER_MARKER: &str = ".docvault.lock";

/// Paths under a storage root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn emergency_dir(&self) -> PathBuf {
        self.root.join(EMERGENCY_DIR)
    }

    pub fn owner_marker(&self) -> PathBuf {
        self.root.join(OWNER_MARKER)
    }

    /// Create the root, snapshot and emergency directories if missing.
    /// Never fails; creation errors are reported in `LayoutReport::failed`.
    pub fn ensure(&self) -> LayoutReport {
        let mut report = LayoutReport::default();

        for dir in [self.root.clone(), self.backups_dir(), self.emergency_dir()] {
            let shown = dir.display().to_string();
            if dir.is_dir() {
                report.existing.push(shown);
                continue;
            }
            match fs::create_dir_all(&dir) {
                Ok(()) => {
                    tracing::info!("created directory {}", shown);
                    report.created.push(shown);
                }
                Err(e) => {
                    tracing::error!("cannot create directory {}: {}", shown, e);
                    report.failed.push(format!("{}: {}", shown, e));
                }
            }
        }

        report
    }

    /// Write the owner marker with this process's pid. Returns the pid found
    /// in a pre-existing marker, which means another process may share the
    /// root (or a previous run did not stop cleanly). Single writer per root
    /// is assumed, not enforced.
    pub fn claim_owner_marker(&self) -> Result<Option<String>, StoreError> {
        let path = self.owner_marker();
        let previous = match fs::read_to_string(&path) {
            Ok(contents) => Some(contents.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(pid) = &previous {
            tracing::warn!(
                "storage root {} already carries an owner marker (pid {}); concurrent writers are not coordinated",
                self.root.display(),
                pid
            );
        }

        fs::write(&path, std::process::id().to_string())?;
        Ok(previous)
    }

    pub fn release_owner_marker(&self) {
        let path = self.owner_marker();
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("failed to remove owner marker {}: {}", path.display(), e);
        }
    }
}
