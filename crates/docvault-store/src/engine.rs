// ABOUTME: Storage engine: atomic whole-document writes with checksum metadata and a .backup sibling.
// ABOUTME: Reads accept wrapped and legacy documents and degrade to the backup, then to a default.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docvault_core::document::StoredMetadata;
use docvault_core::{Clock, DocumentMetadata, Envelope, Integrity, ParsedDocument, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::layout::StorageLayout;

const PRIMARY_EXT: &str = ".json";
const BACKUP_EXT: &str = ".json.backup";
const TEMP_EXT: &str = ".json.tmp";
const BACKUP_TEMP_EXT: &str = ".json.backup.tmp";

/// Which file a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Primary,
    Backup,
}

/// A successfully parsed document and how it was obtained.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub data: Value,
    pub metadata: Option<StoredMetadata>,
    pub source: ReadSource,
    pub integrity: Integrity,
}

impl ReadOutcome {
    pub fn is_legacy(&self) -> bool {
        self.metadata.is_none()
    }

    pub fn integrity_warning(&self) -> bool {
        self.integrity.is_mismatch()
    }
}

/// Reads and writes named documents under a storage root.
#[derive(Clone)]
pub struct StorageEngine {
    layout: StorageLayout,
    clock: Arc<dyn Clock>,
}

impl StorageEngine {
    pub fn new(layout: StorageLayout, clock: Arc<dyn Clock>) -> Self {
        Self { layout, clock }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn primary_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root().join(format!("{name}{PRIMARY_EXT}")))
    }

    pub fn backup_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root().join(format!("{name}{BACKUP_EXT}")))
    }

    pub fn temp_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root().join(format!("{name}{TEMP_EXT}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.primary_path(name).is_ok_and(|p| p.is_file())
    }

    /// Persist `payload` as the whole content of document `name`.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        name: &str,
        payload: &T,
    ) -> Result<DocumentMetadata, StoreError> {
        let data = serde_json::to_value(payload)?;
        self.write_value(name, data)
    }

    /// Copy the current primary to `.backup`, then atomically replace the
    /// primary with a freshly stamped envelope around `data`. An unreadable
    /// primary never replaces the `.backup`, so one of the two stays valid.
    pub fn write_value(&self, name: &str, data: Value) -> Result<DocumentMetadata, StoreError> {
        let primary = self.primary_path(name)?;
        let envelope = Envelope::new(data, self.now())?;
        let json = serde_json::to_string_pretty(&envelope)?;

        match parse_file(&primary) {
            Ok(Some(_)) => install_copy(&primary, &self.backup_path(name)?)?,
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "primary document {} unreadable ({}); keeping its .backup as is",
                name,
                e
            ),
        }

        atomic_write(&primary, json.as_bytes())?;
        tracing::debug!(
            "wrote document {} (checksum {})",
            name,
            envelope.metadata.checksum
        );

        Ok(envelope.metadata)
    }

    /// Read document `name` as `T`. Absent documents yield `default`; an
    /// unreadable primary falls back to `.backup`, then to `default`.
    /// Checksum mismatches are logged and the data is still returned.
    pub fn read<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        let primary = match self.primary_path(name) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("{}", e);
                return default;
            }
        };
        if !primary.is_file() {
            return default;
        }

        match self.read_document(name) {
            Ok(Some(outcome)) => match serde_json::from_value::<T>(outcome.data) {
                Ok(value) => return value,
                Err(e) => {
                    tracing::warn!("document {} does not match its record type: {}", name, e);
                    if outcome.source == ReadSource::Primary
                        && let Some(value) = self.read_backup_typed::<T>(name)
                    {
                        return value;
                    }
                }
            },
            Ok(None) => {}
            Err(e) => tracing::error!("document {} unreadable: {}", name, e),
        }

        tracing::warn!("falling back to default for document {}", name);
        default
    }

    /// Parse document `name`, trying the primary and then `.backup`.
    /// Returns `Ok(None)` if neither file exists.
    pub fn read_document(&self, name: &str) -> Result<Option<ReadOutcome>, StoreError> {
        let primary = self.primary_path(name)?;
        let backup = self.backup_path(name)?;

        let primary_err = match parse_file(&primary) {
            Ok(Some(parsed)) => {
                return Ok(Some(self.outcome(name, parsed, ReadSource::Primary)));
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("primary document {} unreadable: {}", name, e);
                Some(e)
            }
        };

        match parse_file(&backup) {
            Ok(Some(parsed)) => {
                tracing::warn!("serving document {} from its .backup copy", name);
                Ok(Some(self.outcome(name, parsed, ReadSource::Backup)))
            }
            Ok(None) => match primary_err {
                Some(e) => Err(e),
                None => Ok(None),
            },
            Err(e) => {
                tracing::error!("backup document {} unreadable: {}", name, e);
                Err(primary_err.unwrap_or(e))
            }
        }
    }

    fn read_backup_typed<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let backup = self.backup_path(name).ok()?;
        let parsed = parse_file(&backup).ok()??;
        match serde_json::from_value::<T>(parsed.data) {
            Ok(value) => {
                tracing::warn!("serving document {} from its .backup copy", name);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("backup of {} does not match its record type: {}", name, e);
                None
            }
        }
    }

    fn outcome(&self, name: &str, parsed: ParsedDocument, source: ReadSource) -> ReadOutcome {
        let integrity = parsed.verify();
        if let Integrity::Mismatch { stored, computed } = &integrity {
            tracing::warn!(
                "integrity warning: document {} checksum mismatch (stored {}, computed {})",
                name,
                stored,
                computed
            );
        }
        ReadOutcome {
            data: parsed.data,
            metadata: parsed.metadata,
            source,
            integrity,
        }
    }

    /// Names of all primary documents under the root, sorted.
    pub fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name.strip_suffix(PRIMARY_EXT)
                && validate_name(stem).is_ok()
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove `.json.tmp` and `.json.backup.tmp` leftovers from interrupted
    /// writes. Returns the file names removed.
    pub fn cleanup_stray_temp_files(&self) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for entry in fs::read_dir(self.root())? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(TEMP_EXT) && !file_name.ends_with(BACKUP_TEMP_EXT) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::info!("removed stray temp file {}", file_name);
                    removed.push(file_name);
                }
                Err(e) => tracing::warn!("cannot remove stray temp file {}: {}", file_name, e),
            }
        }
        removed.sort();
        Ok(removed)
    }
}

fn parse_file(path: &Path) -> Result<Option<ParsedDocument>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(ParsedDocument::parse(&contents)?))
}

/// Document names become file stems, so they must stay inside the root.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Write `bytes` to `<path>.tmp`, fsync, rename over `path`, then fsync the
/// parent directory. A failure before the rename leaves `path` untouched.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| -> Result<(), StoreError> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return result;
    }

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically to `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Replace `target` with the bytes of `source` without exposing a partial copy.
pub(crate) fn install_copy(source: &Path, target: &Path) -> Result<(), StoreError> {
    let bytes = fs::read(source)?;
    atomic_write(target, &bytes)
}
