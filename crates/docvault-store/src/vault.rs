// ABOUTME: Vault lifecycle: wires engine, collections and background services for one storage root.
// ABOUTME: start() runs the startup recovery pass and spawns loops; stop() backs up and joins them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use docvault_core::{
    BackupReport, BackupStatus, Builder, BuilderStats, Clock, CollectionError, HealthStatus,
    LayoutReport, Lead, StoreError, SystemClock,
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::activity::ActivityLogService;
use crate::backup::BackupScheduler;
use crate::collection::{Collection, CollectionOptions, CollectionStats, Reloadable};
use crate::config::VaultConfig;
use crate::engine::StorageEngine;
use crate::health::HealthMonitor;
use crate::layout::StorageLayout;
use crate::protection::DataProtection;
use crate::schedule::PeriodicTask;
use crate::settings::SettingsStore;

/// Aggregate view for an operator dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub running: bool,
    pub health: HealthStatus,
    pub backup: BackupStatus,
    pub collections: Vec<CollectionStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRecoveryReport {
    /// Records loaded per collection after the reload.
    pub reloaded: Vec<(String, usize)>,
    pub health: HealthStatus,
    pub backup: Option<BackupReport>,
}

pub struct Vault {
    config: VaultConfig,
    engine: StorageEngine,
    layout_report: LayoutReport,
    builders: Collection<Builder>,
    leads: Collection<Lead>,
    activity: ActivityLogService,
    settings: SettingsStore,
    backups: Arc<BackupScheduler>,
    health: Arc<HealthMonitor>,
    protection: DataProtection,
    tasks: Mutex<Vec<PeriodicTask>>,
    running: AtomicBool,
}

impl Vault {
    /// Build a vault on the system clock. Must be called inside a tokio
    /// runtime; collection actors are spawned immediately.
    pub fn open(config: VaultConfig) -> Result<Self, StoreError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: VaultConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let layout = StorageLayout::new(&config.root);
        let layout_report = layout.ensure();
        if !layout.root().is_dir() {
            return Err(StoreError::Layout(layout_report.failed.join("; ")));
        }
        if !layout_report.is_ok() {
            tracing::warn!("storage layout incomplete: {:?}", layout_report.failed);
        }

        let engine = StorageEngine::new(layout, Arc::clone(&clock));
        let builders = Collection::<Builder>::spawn(engine.clone(), CollectionOptions::default());
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        let activity = ActivityLogService::new(
            Collection::spawn(
                engine.clone(),
                CollectionOptions {
                    max_records: Some(config.activity_log_cap),
                },
            ),
            Collection::spawn(engine.clone(), CollectionOptions::default()),
            clock,
        );

        let backups = Arc::new(BackupScheduler::new(engine.clone(), config.backup_retention));
        let health = Arc::new(HealthMonitor::new(
            engine.clone(),
            Arc::clone(&backups),
            HealthMonitor::default_critical(),
        ));
        health.register(Arc::new(builders.clone()));
        health.register(Arc::new(leads.clone()));
        health.register(Arc::new(activity.log_collection().clone()));
        health.register(Arc::new(activity.session_collection().clone()));

        let protection = DataProtection::new(engine.clone(), builders.clone());
        let settings = SettingsStore::new(engine.clone());

        tracing::info!("vault opened at {}", config.root.display());
        Ok(Self {
            config,
            engine,
            layout_report,
            builders,
            leads,
            activity,
            settings,
            backups,
            health,
            protection,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Clean up after any previous run, verify and repair the store, then
    /// start the backup and health loops. Returns the startup health status.
    pub async fn start(&self) -> HealthStatus {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("vault already started");
            return self.health.health_status();
        }

        match self.engine.cleanup_stray_temp_files() {
            Ok(removed) if !removed.is_empty() => {
                tracing::warn!("removed {} stray temp files", removed.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("stray temp file cleanup failed: {}", e),
        }
        if let Err(e) = self.engine.layout().claim_owner_marker() {
            tracing::warn!("cannot write owner marker: {}", e);
        }

        let status = self.health.perform_health_check().await;

        if self.config.backup_on_start
            && let Err(e) = self.backups.perform_full_backup().await
        {
            tracing::error!("startup backup failed: {}", e);
        }

        let mut tasks = self.tasks.lock().await;
        if self.config.enable_backups {
            self.backups.set_auto_enabled(true);
            let backups = Arc::clone(&self.backups);
            tasks.push(PeriodicTask::spawn(
                "backup",
                self.config.backup_interval,
                false,
                move || {
                    let backups = Arc::clone(&backups);
                    async move {
                        if let Err(e) = backups.perform_full_backup().await {
                            tracing::error!("scheduled backup failed: {}", e);
                        }
                    }
                },
            ));
        }

        let health = Arc::clone(&self.health);
        tasks.push(PeriodicTask::spawn(
            "health",
            self.config.health_interval,
            false,
            move || {
                let health = Arc::clone(&health);
                async move {
                    health.perform_health_check().await;
                }
            },
        ));

        tracing::info!("vault started (healthy: {})", status.healthy);
        status
    }

    /// Take a final backup, stop the loops and release the owner marker.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.config.enable_backups {
            match self.backups.perform_full_backup().await {
                Ok(report) => tracing::info!("final backup {} taken", report.snapshot),
                Err(e) => tracing::error!("final backup failed: {}", e),
            }
        }

        let tasks: Vec<PeriodicTask> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            task.stop().await;
        }
        self.backups.set_auto_enabled(false);
        self.engine.layout().release_owner_marker();
        tracing::info!("vault stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn force_backup_now(&self) -> Result<BackupReport, StoreError> {
        tracing::info!("forced backup requested");
        self.backups.perform_full_backup().await
    }

    pub fn backup_status(&self) -> Result<BackupStatus, StoreError> {
        self.backups.status()
    }

    pub async fn perform_health_check(&self) -> HealthStatus {
        self.health.perform_health_check().await
    }

    pub async fn force_health_check(&self) -> HealthStatus {
        self.health.force_health_check().await
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health.health_status()
    }

    pub async fn builder_stats(&self) -> Result<BuilderStats, CollectionError> {
        Ok(BuilderStats::from_builders(&self.builders.list().await?))
    }

    pub async fn system_status(&self) -> Result<SystemStatus, CollectionError> {
        let collections = vec![
            self.builders.stats().await?,
            self.leads.stats().await?,
            self.activity.log_collection().stats().await?,
            self.activity.session_collection().stats().await?,
        ];
        Ok(SystemStatus {
            running: self.is_running(),
            health: self.health.health_status(),
            backup: self.backups.status()?,
            collections,
        })
    }

    /// Reload every collection from disk, run a health check and take a
    /// backup. For use after an operator has repaired files by hand.
    pub async fn perform_system_recovery(&self) -> Result<SystemRecoveryReport, CollectionError> {
        let reloadables: [&dyn Reloadable; 4] = [
            &self.builders,
            &self.leads,
            self.activity.log_collection(),
            self.activity.session_collection(),
        ];

        let mut reloaded = Vec::new();
        for collection in reloadables {
            let count = collection.reload().await?;
            reloaded.push((collection.document_name().to_string(), count));
        }

        let health = self.health.force_health_check().await;
        let backup = match self.backups.perform_full_backup().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("backup after system recovery failed: {}", e);
                None
            }
        };

        Ok(SystemRecoveryReport {
            reloaded,
            health,
            backup,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn layout_report(&self) -> &LayoutReport {
        &self.layout_report
    }

    pub fn builders(&self) -> &Collection<Builder> {
        &self.builders
    }

    pub fn leads(&self) -> &Collection<Lead> {
        &self.leads
    }

    pub fn activity(&self) -> &ActivityLogService {
        &self.activity
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn backups(&self) -> &BackupScheduler {
        &self.backups
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn protection(&self) -> &DataProtection {
        &self.protection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use docvault_core::NewActivity;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> VaultConfig {
        VaultConfig::new(dir.path().join("data"))
    }

    #[tokio::test]
    async fn open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(config(&dir)).unwrap();

        assert_eq!(vault.layout_report().created.len(), 3);
        assert!(vault.engine().layout().backups_dir().is_dir());
        assert!(!vault.is_running());
    }

    #[tokio::test]
    async fn open_fails_when_root_cannot_exist() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let result = Vault::open(VaultConfig::new(blocker.join("data")));
        assert!(matches!(result, Err(StoreError::Layout(_))));
    }

    #[tokio::test]
    async fn start_repairs_fresh_root_and_stop_takes_final_backup() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(config(&dir)).unwrap();
        let root = vault.engine().root().to_path_buf();
        fs::write(root.join("leads.json.tmp"), "partial").unwrap();

        let status = vault.start().await;
        assert!(status.healthy);
        assert_eq!(status.recovery.requested, 2);
        assert!(!root.join("leads.json.tmp").exists());
        assert!(root.join("builders.json").exists());
        assert!(root.join(".docvault.lock").exists());
        assert!(vault.backup_status().unwrap().auto_backup_enabled);

        // A second start is a no-op.
        vault.start().await;

        vault.builders().add(Builder::new("b1", "Acme")).await.unwrap();
        vault.stop().await;

        assert!(!vault.is_running());
        assert!(!root.join(".docvault.lock").exists());
        let backup = vault.backup_status().unwrap();
        assert_eq!(backup.total_backups, 1);
        assert!(!backup.auto_backup_enabled);
        let latest = vault.backups().find_latest_containing("builders.json").unwrap();
        assert!(latest.is_some());
    }

    #[tokio::test]
    async fn backups_disabled_skips_loop_and_final_backup() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.enable_backups = false;
        let vault = Vault::open(config).unwrap();

        vault.start().await;
        vault.stop().await;
        assert_eq!(vault.backup_status().unwrap().total_backups, 0);
    }

    #[tokio::test]
    async fn system_status_aggregates_collections() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(config(&dir)).unwrap();
        vault.leads().add(Lead::new("l1")).await.unwrap();
        vault
            .activity()
            .add_log(NewActivity::new("admin", "login", "auth"))
            .await
            .unwrap();

        let status = vault.system_status().await.unwrap();
        assert!(!status.running);
        let counts: Vec<(String, usize)> = status
            .collections
            .iter()
            .map(|c| (c.name.clone(), c.records))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("builders".to_string(), 0),
                ("leads".to_string(), 1),
                ("activity_logs".to_string(), 1),
                ("user_sessions".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn system_recovery_reloads_and_backs_up() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(config(&dir)).unwrap();
        vault.builders().add(Builder::new("b1", "Acme")).await.unwrap();

        // Edit the file behind the cache's back.
        vault
            .engine()
            .write("builders", &serde_json::json!([{"id": "b1"}, {"id": "b2"}]))
            .unwrap();

        let report = vault.perform_system_recovery().await.unwrap();
        assert!(report.reloaded.contains(&("builders".to_string(), 2)));
        assert!(report.backup.is_some());
        assert_eq!(vault.builders().count().await.unwrap(), 2);
    }
}
