// ABOUTME: Settings store backed by the single-object system_settings document.
// ABOUTME: Reads return defaults when the document is absent; saves are serialized and stamped.

use docvault_core::settings::SETTINGS_DOCUMENT;
use docvault_core::{Settings, StoreError};
use tokio::sync::Mutex;

use crate::engine::StorageEngine;

pub struct SettingsStore {
    engine: StorageEngine,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(engine: StorageEngine) -> Self {
        Self {
            engine,
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Settings {
        self.engine.read(SETTINGS_DOCUMENT, Settings::default())
    }

    pub async fn save(&self, mut settings: Settings) -> Result<Settings, StoreError> {
        let _guard = self.write_lock.lock().await;
        settings.updated_at = Some(self.engine.now());
        self.engine.write(SETTINGS_DOCUMENT, &settings)?;
        tracing::info!("system settings saved");
        Ok(settings)
    }

    /// Read, apply `f`, and save as one step relative to other saves.
    pub async fn update<F>(&self, f: F) -> Result<Settings, StoreError>
    where
        F: FnOnce(&mut Settings),
    {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.get();
        f(&mut settings);
        settings.updated_at = Some(self.engine.now());
        self.engine.write(SETTINGS_DOCUMENT, &settings)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use docvault_core::SystemClock;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::layout::StorageLayout;

    fn store(dir: &TempDir) -> SettingsStore {
        let layout = StorageLayout::new(dir.path());
        layout.ensure();
        SettingsStore::new(StorageEngine::new(layout, Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn absent_document_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.get(), Settings::default());
    }

    #[tokio::test]
    async fn save_stamps_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut settings = store.get();
        settings.smtp.enabled = true;
        let saved = store.save(settings).await.unwrap();
        assert!(saved.updated_at.is_some());

        let loaded = store.get();
        assert!(loaded.smtp.enabled);
        assert_eq!(loaded.updated_at, saved.updated_at);
    }

    #[tokio::test]
    async fn update_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .engine
            .write(SETTINGS_DOCUMENT, &json!({"theme": "dark", "sms": {"enabled": true}}))
            .unwrap();

        let updated = store.update(|s| s.backup.enabled = false).await.unwrap();
        assert!(updated.sms.enabled);
        assert!(!updated.backup.enabled);
        assert_eq!(store.get().extra["theme"], json!("dark"));
    }
}
