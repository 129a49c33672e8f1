// ABOUTME: Persistence layer for docvault: atomic JSON documents, collection actors and background services.
// ABOUTME: The Vault type wires everything for one storage root and owns the start/stop lifecycle.

pub mod activity;
pub mod backup;
pub mod collection;
pub mod config;
pub mod engine;
pub mod health;
pub mod layout;
pub mod protection;
pub mod schedule;
pub mod settings;
pub mod vault;

pub use activity::ActivityLogService;
pub use backup::{BackupScheduler, DEFAULT_RETENTION, SnapshotInfo};
pub use collection::{
    BulkSummary, Collection, CollectionOptions, CollectionStats, LoadState, Reloadable,
};
pub use config::{ConfigError, VaultConfig};
pub use engine::{ReadOutcome, ReadSource, StorageEngine, validate_name};
pub use health::HealthMonitor;
pub use layout::StorageLayout;
pub use protection::DataProtection;
pub use schedule::PeriodicTask;
pub use settings::SettingsStore;
pub use vault::{SystemRecoveryReport, SystemStatus, Vault};
