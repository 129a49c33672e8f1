// ABOUTME: End-to-end scenarios for the docvault store running against a real directory.
// ABOUTME: Covers snapshot recovery, retention, emergency protection and restart persistence.

use std::fs;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use docvault_core::{Builder, Clock, CollectionError, Lead, ManualClock, NewActivity};
use docvault_store::{Vault, VaultConfig};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Vault {
    Vault::open(VaultConfig::new(dir.path().join("data"))).unwrap()
}

#[tokio::test]
async fn deleted_primary_is_restored_from_latest_snapshot() {
    let dir = TempDir::new().unwrap();
    let vault = open(&dir);
    let root = vault.engine().root().to_path_buf();

    vault
        .builders()
        .add(Builder::new("b1", "Acme Homes").mark_imported())
        .await
        .unwrap();
    let report = vault.force_backup_now().await.unwrap();
    assert!(report.files.contains(&"builders.json".to_string()));

    // Written after the snapshot, so recovery must drop it.
    vault.builders().add(Builder::new("b2", "Late Corp")).await.unwrap();
    fs::remove_file(root.join("builders.json")).unwrap();

    let status = vault.perform_health_check().await;
    assert!(status.healthy, "issues: {:?}", status.issues);
    assert_eq!(status.recovery.recovered, 1);
    assert_eq!(status.recovery.documents, vec!["builders".to_string()]);

    let ids: Vec<String> = vault
        .builders()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec!["b1".to_string()]);
    assert_eq!(vault.health_status().recovery.recovered, 1);
}

#[tokio::test]
async fn corrupt_primary_is_replaced_and_cache_reloaded() {
    let dir = TempDir::new().unwrap();
    let vault = open(&dir);
    let root = vault.engine().root().to_path_buf();

    vault.leads().add(Lead::new("l1")).await.unwrap();
    vault.builders().add(Builder::new("b1", "Acme Homes")).await.unwrap();
    vault.force_backup_now().await.unwrap();

    fs::write(root.join("leads.json"), "{ not json").unwrap();
    let status = vault.force_health_check().await;

    assert!(status.healthy, "issues: {:?}", status.issues);
    assert_eq!(status.recovery.requested, 1);
    let leads = vault.leads().list().await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].id, "l1");

    let outcome = vault.engine().read_document("leads").unwrap().unwrap();
    assert!(!outcome.integrity_warning());
}

#[tokio::test]
async fn corrupt_primary_without_snapshot_degrades_health() {
    let dir = TempDir::new().unwrap();
    let vault = open(&dir);
    let root = vault.engine().root().to_path_buf();

    fs::write(root.join("builders.json"), "garbage").unwrap();
    let status = vault.perform_health_check().await;

    assert!(!status.healthy);
    assert!(status.issues.iter().any(|i| i.contains("builders.json")));
    // The damaged file is left in place for an operator.
    assert_eq!(fs::read_to_string(root.join("builders.json")).unwrap(), "garbage");
}

#[tokio::test]
async fn retention_keeps_newest_snapshots() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
    let shared: Arc<dyn Clock> = clock.clone();

    let mut config = VaultConfig::new(dir.path().join("data"));
    config.backup_retention = 3;
    let vault = Vault::open_with_clock(config, shared).unwrap();
    vault.leads().add(Lead::new("l1")).await.unwrap();

    for _ in 0..8 {
        vault.force_backup_now().await.unwrap();
        clock.advance(Duration::seconds(1));
    }

    let names: Vec<String> = vault
        .backups()
        .list_snapshots()
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "backup_2026-01-01T00-00-07-000Z".to_string(),
            "backup_2026-01-01T00-00-06-000Z".to_string(),
            "backup_2026-01-01T00-00-05-000Z".to_string(),
        ]
    );
    assert_eq!(vault.backup_status().unwrap().total_backups, 3);
}

#[tokio::test]
async fn emergency_backup_survives_collection_wipe() {
    let dir = TempDir::new().unwrap();
    let vault = open(&dir);

    vault
        .builders()
        .add(Builder::new("b1", "Acme Homes").mark_imported())
        .await
        .unwrap();
    vault.builders().add(Builder::new("b2", "Local Build")).await.unwrap();

    let report = vault.protection().create_emergency_backup().await.unwrap();
    assert_eq!(report.count, 1);

    assert_eq!(vault.builders().clear().await.unwrap(), 2);
    let restored = vault.protection().restore_from_latest_backup().await.unwrap();
    assert_eq!(restored.restored, 1);

    let builders = vault.builders().list().await.unwrap();
    assert_eq!(builders.len(), 1);
    assert!(builders[0].is_externally_imported());

    // The restored record only carries `imported`; the first pass completes its flags.
    let verify = vault.protection().verify_and_fix().await.unwrap();
    assert!(verify.healthy);
    assert_eq!(verify.fixed, 1);
    let repaired = vault.builders().get("b1").await.unwrap();
    assert!(repaired.gmb_imported && repaired.imported_from_gmb && repaired.preserve_data);
    assert_eq!(vault.protection().verify_and_fix().await.unwrap().fixed, 0);
}

#[tokio::test]
async fn duplicate_builder_is_rejected() {
    let dir = TempDir::new().unwrap();
    let vault = open(&dir);

    vault
        .builders()
        .add(Builder::new("b1", "Acme Homes").with_email("sales@acme.test"))
        .await
        .unwrap();
    let err = vault
        .builders()
        .add(Builder::new("", "Other Name").with_email("SALES@acme.test"))
        .await
        .unwrap_err();

    assert!(err.is_duplicate());
    assert!(matches!(err, CollectionError::Duplicate { ref existing_id, .. } if existing_id == "b1"));
    assert_eq!(vault.builders().count().await.unwrap(), 1);
}

#[tokio::test]
async fn data_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let vault = open(&dir);
        vault.start().await;
        vault.builders().add(Builder::new("b1", "Acme Homes")).await.unwrap();
        vault
            .activity()
            .add_log(NewActivity::new("admin", "login", "auth"))
            .await
            .unwrap();
        vault
            .settings()
            .update(|s| s.smtp.enabled = true)
            .await
            .unwrap();
        vault.stop().await;
    }

    let vault = open(&dir);
    let status = vault.start().await;
    assert!(status.healthy);
    assert_eq!(status.recovery.requested, 0);

    assert_eq!(vault.builders().get("b1").await.unwrap().company_name, "Acme Homes");
    assert_eq!(vault.activity().logs(None).await.unwrap().len(), 1);
    assert!(vault.settings().get().smtp.enabled);
    // One final backup from each stop.
    vault.stop().await;
    assert_eq!(vault.backup_status().unwrap().total_backups, 2);
}
