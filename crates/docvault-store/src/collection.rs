// ABOUTME: Typed, cached collection of records persisted as one document, owned by a single actor task.
// ABOUTME: CRUD with duplicate detection on add, bulk add, forced reload and the Reloadable seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docvault_core::{CollectionError, DuplicatePolicy, Entity, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::engine::StorageEngine;

type Reply<R> = oneshot::Sender<Result<R, CollectionError>>;
type Mutation<T> = Box<dyn FnOnce(&mut T) + Send>;
type Sweep<T> = Box<dyn FnMut(&mut T) -> bool + Send>;

/// Commands processed sequentially by the collection actor.
enum Command<T> {
    List(Reply<Vec<T>>),
    Get(String, Reply<T>),
    Count(Reply<usize>),
    Add(T, Reply<T>),
    InsertIfAbsent(T, Reply<bool>),
    Update(String, Map<String, Value>, Reply<T>),
    Modify(String, Mutation<T>, Reply<T>),
    ModifyWhere(Sweep<T>, Reply<usize>),
    Delete(String, Reply<T>),
    Clear(Reply<usize>),
    Reload(Reply<usize>),
    Persist(Reply<bool>),
    Stats(Reply<CollectionStats>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Keep at most this many records; the oldest are dropped after an add.
    pub max_records: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub name: String,
    pub state: LoadState,
    pub records: usize,
    /// Stored records kept as raw JSON because they do not fit the record type.
    #[serde(default)]
    pub unparsed: usize,
    #[serde(default)]
    pub read_only: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

impl CollectionStats {
    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }
}

/// Aggregate outcome of `bulk_add`. Individual failures never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// A collection cache that can be told to re-read its document, used after
/// the health monitor restores a primary from a snapshot.
#[async_trait]
pub trait Reloadable: Send + Sync {
    fn document_name(&self) -> &str;

    /// Discard the cache and reload; returns the number of records loaded.
    async fn reload(&self) -> Result<usize, CollectionError>;

    /// Write a loaded cache back over its document. Returns false when
    /// there was no loaded cache to write.
    async fn resync(&self) -> Result<bool, CollectionError>;
}

/// Handle to a collection actor. Cloning shares the same actor.
#[derive(Clone)]
pub struct Collection<T: Entity> {
    name: &'static str,
    cmd_tx: mpsc::Sender<Command<T>>,
}

impl<T: Entity> Collection<T> {
    /// Spawn the actor for `T::COLLECTION`. The document is not read until
    /// the first operation that needs records.
    pub fn spawn(engine: StorageEngine, options: CollectionOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command<T>>(64);
        let actor = CollectionActor {
            engine,
            name: T::COLLECTION,
            options,
            policy: T::duplicate_policy(),
            records: Vec::new(),
            unparsed: Vec::new(),
            read_only: false,
            state: LoadState::Unloaded,
            last_sync: None,
            cmd_rx,
        };
        tokio::spawn(actor.run());

        Self {
            name: T::COLLECTION,
            cmd_tx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(Reply<R>) -> Command<T>,
    ) -> Result<R, CollectionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| CollectionError::ChannelClosed)?;
        rx.await.map_err(|_| CollectionError::ChannelClosed)?
    }

    /// Copy of every record, in stored order.
    pub async fn list(&self) -> Result<Vec<T>, CollectionError> {
        self.request(Command::List).await
    }

    pub async fn get(&self, id: &str) -> Result<T, CollectionError> {
        let id = id.to_string();
        self.request(|reply| Command::Get(id, reply)).await
    }

    pub async fn count(&self) -> Result<usize, CollectionError> {
        self.request(Command::Count).await
    }

    /// Insert a new record. An empty id is replaced with a fresh ULID.
    /// Fails with `Duplicate` if the entity's duplicate policy matches an
    /// existing record.
    pub async fn add(&self, record: T) -> Result<T, CollectionError> {
        self.request(|reply| Command::Add(record, reply)).await
    }

    /// Insert `record` unchanged unless a record with the same id exists.
    /// Returns whether it was inserted.
    pub async fn insert_if_absent(&self, record: T) -> Result<bool, CollectionError> {
        self.request(|reply| Command::InsertIfAbsent(record, reply))
            .await
    }

    /// Shallow-merge `patch` into the record's JSON form. The `id` key is
    /// ignored and `updatedAt` is refreshed.
    pub async fn update(&self, id: &str, patch: Map<String, Value>) -> Result<T, CollectionError> {
        let id = id.to_string();
        self.request(|reply| Command::Update(id, patch, reply))
            .await
    }

    /// Apply `f` to one record in place and persist.
    pub async fn modify<F>(&self, id: &str, f: F) -> Result<T, CollectionError>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let id = id.to_string();
        self.request(|reply| Command::Modify(id, Box::new(f), reply))
            .await
    }

    /// Apply `f` to every record; records for which it returns true are
    /// stamped and the document is persisted once. Returns the change count.
    pub async fn modify_where<F>(&self, f: F) -> Result<usize, CollectionError>
    where
        F: FnMut(&mut T) -> bool + Send + 'static,
    {
        self.request(|reply| Command::ModifyWhere(Box::new(f), reply))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<T, CollectionError> {
        let id = id.to_string();
        self.request(|reply| Command::Delete(id, reply)).await
    }

    /// Remove every record. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, CollectionError> {
        self.request(Command::Clear).await
    }

    pub async fn force_reload(&self) -> Result<usize, CollectionError> {
        self.request(Command::Reload).await
    }

    /// Rewrite the document from the cache, if the cache has been loaded.
    pub async fn persist_cache(&self) -> Result<bool, CollectionError> {
        self.request(Command::Persist).await
    }

    pub async fn stats(&self) -> Result<CollectionStats, CollectionError> {
        self.request(Command::Stats).await
    }

    /// Add records one at a time, counting outcomes. `progress` receives
    /// `(processed, total)` after each record.
    pub async fn bulk_add<F>(&self, records: Vec<T>, mut progress: F) -> BulkSummary
    where
        F: FnMut(usize, usize),
    {
        let total = records.len();
        let mut summary = BulkSummary::default();

        for (index, record) in records.into_iter().enumerate() {
            let label = record.label();
            match self.add(record).await {
                Ok(_) => summary.created += 1,
                Err(e) if e.is_duplicate() => {
                    tracing::debug!("bulk add skipped duplicate {}: {}", label, e);
                    summary.duplicates += 1;
                }
                Err(e) => {
                    summary.errors += 1;
                    summary.failures.push(format!("{label}: {e}"));
                }
            }
            progress(index + 1, total);
        }

        tracing::info!(
            "bulk add into {}: {} created, {} duplicates, {} errors",
            self.name,
            summary.created,
            summary.duplicates,
            summary.errors
        );
        summary
    }
}

#[async_trait]
impl<T: Entity> Reloadable for Collection<T> {
    fn document_name(&self) -> &str {
        self.name
    }

    async fn reload(&self) -> Result<usize, CollectionError> {
        self.force_reload().await
    }

    async fn resync(&self) -> Result<bool, CollectionError> {
        self.persist_cache().await
    }
}

/// Owns the cached records of one collection. Every mutation updates memory,
/// then rewrites the whole document; a failed write restores the cache.
///
/// Stored records that do not deserialize are kept verbatim in `unparsed`
/// and written back after the typed records. A document that cannot be
/// loaded at all makes the collection read-only until the next reload.
struct CollectionActor<T: Entity> {
    engine: StorageEngine,
    name: &'static str,
    options: CollectionOptions,
    policy: DuplicatePolicy<T>,
    records: Vec<T>,
    unparsed: Vec<Value>,
    read_only: bool,
    state: LoadState,
    last_sync: Option<DateTime<Utc>>,
    cmd_rx: mpsc::Receiver<Command<T>>,
}

impl<T: Entity> CollectionActor<T> {
    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd);
        }
        tracing::debug!("collection {} actor stopped", self.name);
    }

    fn handle(&mut self, cmd: Command<T>) {
        // Send errors mean the caller stopped waiting; nothing to do.
        match cmd {
            Command::List(reply) => {
                self.ensure_loaded();
                let _ = reply.send(Ok(self.records.clone()));
            }
            Command::Get(id, reply) => {
                let _ = reply.send(self.get(&id));
            }
            Command::Count(reply) => {
                self.ensure_loaded();
                let _ = reply.send(Ok(self.records.len()));
            }
            Command::Add(record, reply) => {
                let _ = reply.send(self.add(record));
            }
            Command::InsertIfAbsent(record, reply) => {
                let _ = reply.send(self.insert_if_absent(record));
            }
            Command::Update(id, patch, reply) => {
                let _ = reply.send(self.update(&id, patch));
            }
            Command::Modify(id, f, reply) => {
                let _ = reply.send(self.modify(&id, f));
            }
            Command::ModifyWhere(f, reply) => {
                let _ = reply.send(self.modify_where(f));
            }
            Command::Delete(id, reply) => {
                let _ = reply.send(self.delete(&id));
            }
            Command::Clear(reply) => {
                let _ = reply.send(self.clear());
            }
            Command::Reload(reply) => {
                let _ = reply.send(Ok(self.load()));
            }
            Command::Persist(reply) => {
                let _ = reply.send(self.persist_cache());
            }
            Command::Stats(reply) => {
                let _ = reply.send(Ok(CollectionStats {
                    name: self.name.to_string(),
                    state: self.state,
                    records: self.records.len(),
                    unparsed: self.unparsed.len(),
                    read_only: self.read_only,
                    last_sync: self.last_sync,
                }));
            }
        }
    }

    fn ensure_loaded(&mut self) {
        if self.state != LoadState::Loaded {
            self.load();
        }
    }

    fn load(&mut self) -> usize {
        self.state = LoadState::Loading;
        self.records.clear();
        self.unparsed.clear();
        self.read_only = false;

        match self.engine.read_document(self.name) {
            Ok(None) => {}
            Ok(Some(outcome)) => match outcome.data {
                Value::Array(items) => self.accept(items),
                _ => {
                    tracing::error!(
                        "document {} is not a record list; refusing writes until it is reloaded",
                        self.name
                    );
                    self.read_only = true;
                }
            },
            Err(e) => {
                tracing::error!(
                    "cannot load {}: {}; refusing writes until it is reloaded",
                    self.name,
                    e
                );
                self.read_only = true;
            }
        }

        self.state = LoadState::Loaded;
        self.last_sync = Some(self.engine.now());
        tracing::debug!("loaded {} records into {}", self.records.len(), self.name);
        self.records.len()
    }

    fn accept(&mut self, items: Vec<Value>) {
        for item in items {
            match serde_json::from_value::<T>(item.clone()) {
                Ok(record) => self.records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "keeping record {} of {} as raw JSON: {}",
                        raw_id(&item).unwrap_or("<no id>"),
                        self.name,
                        e
                    );
                    self.unparsed.push(item);
                }
            }
        }
    }

    fn ensure_writable(&mut self) -> Result<(), CollectionError> {
        self.ensure_loaded();
        if self.read_only {
            return Err(CollectionError::ReadOnly(self.name.to_string()));
        }
        Ok(())
    }

    fn document(&self) -> Result<Value, StoreError> {
        let mut items = Vec::with_capacity(self.records.len() + self.unparsed.len());
        for record in &self.records {
            items.push(serde_json::to_value(record)?);
        }
        items.extend(self.unparsed.iter().cloned());
        Ok(Value::Array(items))
    }

    fn commit(&mut self, previous: Vec<T>) -> Result<(), CollectionError> {
        let written = self
            .document()
            .and_then(|doc| self.engine.write_value(self.name, doc));
        match written {
            Ok(_) => {
                self.last_sync = Some(self.engine.now());
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to persist {}: {}", self.name, e);
                self.records = previous;
                Err(e.into())
            }
        }
    }

    fn persist_cache(&mut self) -> Result<bool, CollectionError> {
        if self.state != LoadState::Loaded || self.read_only {
            return Ok(false);
        }
        let current = self.records.clone();
        self.commit(current)?;
        tracing::info!("rewrote {} from its cache ({} records)", self.name, self.records.len());
        Ok(true)
    }

    fn unparsed_has_id(&self, id: &str) -> bool {
        self.unparsed.iter().any(|raw| raw_id(raw) == Some(id))
    }

    fn position(&self, id: &str) -> Result<usize, CollectionError> {
        self.records
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))
    }

    fn get(&mut self, id: &str) -> Result<T, CollectionError> {
        self.ensure_loaded();
        let index = self.position(id)?;
        Ok(self.records[index].clone())
    }

    fn add(&mut self, mut record: T) -> Result<T, CollectionError> {
        self.ensure_writable()?;
        if record.id().is_empty() {
            record.set_id(Ulid::new().to_string());
        }

        if let Some(conflict) = self.policy.find_conflict(&record, &self.records) {
            tracing::warn!(
                "rejected duplicate in {}: {} matches {} on {}",
                self.name,
                record.label(),
                conflict.existing.id(),
                conflict.rule
            );
            return Err(CollectionError::Duplicate {
                rule: conflict.rule,
                existing_id: conflict.existing.id().to_string(),
                existing_label: conflict.existing.label(),
            });
        }
        if self.unparsed_has_id(record.id()) {
            return Err(CollectionError::Duplicate {
                rule: "id",
                existing_id: record.id().to_string(),
                existing_label: record.id().to_string(),
            });
        }

        let now = self.engine.now();
        record.set_created_at(now);
        record.set_updated_at(now);

        let previous = self.records.clone();
        self.records.push(record.clone());
        if let Some(max) = self.options.max_records
            && self.records.len() > max
        {
            let excess = self.records.len() - max;
            self.records.drain(..excess);
        }
        self.commit(previous)?;

        tracing::debug!("added {} to {}", record.id(), self.name);
        Ok(record)
    }

    fn insert_if_absent(&mut self, record: T) -> Result<bool, CollectionError> {
        self.ensure_writable()?;
        if record.id().is_empty() {
            return Err(CollectionError::InvalidPatch(
                "record without an id cannot be merged".to_string(),
            ));
        }
        if self.records.iter().any(|r| r.id() == record.id()) || self.unparsed_has_id(record.id()) {
            return Ok(false);
        }

        let previous = self.records.clone();
        self.records.push(record);
        self.commit(previous)?;
        Ok(true)
    }

    fn update(&mut self, id: &str, patch: Map<String, Value>) -> Result<T, CollectionError> {
        self.ensure_writable()?;
        let index = self.position(id)?;

        let mut value = serde_json::to_value(&self.records[index])?;
        let Value::Object(fields) = &mut value else {
            return Err(CollectionError::InvalidPatch(format!(
                "record {id} is not a JSON object"
            )));
        };
        for (key, field) in patch {
            if key != "id" {
                fields.insert(key, field);
            }
        }

        let mut updated: T = serde_json::from_value(value)
            .map_err(|e| CollectionError::InvalidPatch(e.to_string()))?;
        updated.set_updated_at(self.engine.now());

        let previous = self.records.clone();
        self.records[index] = updated.clone();
        self.commit(previous)?;
        Ok(updated)
    }

    fn modify(&mut self, id: &str, f: Mutation<T>) -> Result<T, CollectionError> {
        self.ensure_writable()?;
        let index = self.position(id)?;

        let previous = self.records.clone();
        let record = &mut self.records[index];
        f(record);
        record.set_id(id.to_string());
        record.set_updated_at(self.engine.now());
        let modified = record.clone();

        self.commit(previous)?;
        Ok(modified)
    }

    fn modify_where(&mut self, mut f: Sweep<T>) -> Result<usize, CollectionError> {
        self.ensure_writable()?;
        let now = self.engine.now();

        let previous = self.records.clone();
        let mut changed = 0;
        for record in &mut self.records {
            if f(record) {
                record.set_updated_at(now);
                changed += 1;
            }
        }

        if changed > 0 {
            self.commit(previous)?;
        }
        Ok(changed)
    }

    fn delete(&mut self, id: &str) -> Result<T, CollectionError> {
        self.ensure_writable()?;
        let index = self.position(id)?;

        let previous = self.records.clone();
        let removed = self.records.remove(index);
        self.commit(previous)?;
        Ok(removed)
    }

    fn clear(&mut self) -> Result<usize, CollectionError> {
        self.ensure_writable()?;
        let previous = std::mem::take(&mut self.records);
        let unparsed = std::mem::take(&mut self.unparsed);
        let removed = previous.len() + unparsed.len();
        if let Err(e) = self.commit(previous) {
            self.unparsed = unparsed;
            return Err(e);
        }
        tracing::warn!("cleared {} records from {}", removed, self.name);
        Ok(removed)
    }
}

fn raw_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use docvault_core::{Builder, ErrorCode, Lead, OpResult, SystemClock};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::layout::StorageLayout;

    fn engine(dir: &TempDir) -> StorageEngine {
        let layout = StorageLayout::new(dir.path());
        layout.ensure();
        StorageEngine::new(layout, Arc::new(SystemClock))
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[tokio::test]
    async fn loads_lazily_and_serves_from_memory() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.write("leads", &json!([{"id": "l1", "status": "new"}])).unwrap();

        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        assert_eq!(leads.stats().await.unwrap().state, LoadState::Unloaded);

        assert_eq!(leads.list().await.unwrap().len(), 1);
        assert!(leads.stats().await.unwrap().is_loaded());

        // Changes on disk are not seen until a reload.
        engine.write("leads", &json!([])).unwrap();
        assert_eq!(leads.count().await.unwrap(), 1);
        assert_eq!(leads.force_reload().await.unwrap(), 0);
        assert_eq!(leads.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_stamps_and_persists() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());

        let added = leads.add(Lead::new("")).await.unwrap();
        assert!(!added.id.is_empty());
        assert!(added.created_at.is_some());
        assert_eq!(added.created_at, added.updated_at);

        let on_disk: Vec<Lead> = engine.read("leads", Vec::new());
        assert_eq!(on_disk, vec![added.clone()]);
        assert_eq!(leads.get(&added.id).await.unwrap(), added);
    }

    #[tokio::test]
    async fn add_rejects_same_id() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(engine(&dir), CollectionOptions::default());

        leads.add(Lead::new("l1")).await.unwrap();
        let err = leads.add(Lead::new("l1")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(leads.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn builder_external_id_collision_is_rejected() {
        let dir = TempDir::new().unwrap();
        let builders = Collection::<Builder>::spawn(engine(&dir), CollectionOptions::default());

        builders
            .add(Builder::new("b1", "Acme Stands").with_external_id("place-77"))
            .await
            .unwrap();

        let err = builders
            .add(Builder::new("b2", "Acme Stands GmbH").with_external_id("place-77"))
            .await
            .unwrap_err();
        match &err {
            CollectionError::Duplicate {
                rule,
                existing_id,
                existing_label,
            } => {
                assert_eq!(*rule, "externalId");
                assert_eq!(existing_id, "b1");
                assert_eq!(existing_label, "Acme Stands");
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        let result: OpResult<Builder> = Err(err).into();
        assert_eq!(result.code, Some(ErrorCode::DuplicateConflict));

        builders
            .add(Builder::new("b3", "Novel Booths").with_external_id("place-88"))
            .await
            .unwrap();
        assert_eq!(builders.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_merges_fields_and_keeps_id() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(engine(&dir), CollectionOptions::default());
        let added = leads.add(Lead::new("l1")).await.unwrap();

        let updated = leads
            .update(
                "l1",
                patch(json!({"id": "hijack", "status": "contacted", "priority": "high"})),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, "l1");
        assert_eq!(updated.status.as_deref(), Some("contacted"));
        assert_eq!(updated.extra["priority"], json!("high"));
        assert_eq!(updated.created_at, added.created_at);
        assert!(updated.updated_at >= added.updated_at);
    }

    #[tokio::test]
    async fn update_with_wrong_type_is_invalid_patch() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(engine(&dir), CollectionOptions::default());
        leads.add(Lead::new("l1")).await.unwrap();

        let err = leads
            .update("l1", patch(json!({"status": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidPatch(_)));
        assert_eq!(leads.get("l1").await.unwrap().status.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(engine(&dir), CollectionOptions::default());

        assert!(matches!(
            leads.get("nope").await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            leads.update("nope", Map::new()).await,
            Err(CollectionError::NotFound(_))
        ));
        let result: OpResult<Lead> = leads.delete("nope").await.into();
        assert!(!result.success);
        assert_eq!(result.code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn delete_and_clear_persist() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        for id in ["l1", "l2", "l3"] {
            leads.add(Lead::new(id)).await.unwrap();
        }

        assert_eq!(leads.delete("l2").await.unwrap().id, "l2");
        let ids: Vec<String> = leads.list().await.unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["l1", "l3"]);

        assert_eq!(leads.clear().await.unwrap(), 2);
        let on_disk: Vec<Lead> = engine.read("leads", vec![Lead::new("default")]);
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_cache() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        leads.add(Lead::new("l1")).await.unwrap();

        // A directory squatting on the temp path makes the next write fail.
        fs::create_dir(engine.temp_path("leads").unwrap()).unwrap();

        let err = leads.add(Lead::new("l2")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoFailure);
        assert_eq!(leads.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn max_records_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(
            engine(&dir),
            CollectionOptions {
                max_records: Some(2),
            },
        );
        for id in ["l1", "l2", "l3"] {
            leads.add(Lead::new(id)).await.unwrap();
        }

        let ids: Vec<String> = leads.list().await.unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["l2", "l3"]);
    }

    #[tokio::test]
    async fn insert_if_absent_is_a_union() {
        let dir = TempDir::new().unwrap();
        let builders = Collection::<Builder>::spawn(engine(&dir), CollectionOptions::default());
        builders.add(Builder::new("b1", "Live")).await.unwrap();

        assert!(!builders.insert_if_absent(Builder::new("b1", "Stale")).await.unwrap());
        assert!(builders.insert_if_absent(Builder::new("b2", "Restored")).await.unwrap());

        assert_eq!(builders.get("b1").await.unwrap().company_name, "Live");
        let restored = builders.get("b2").await.unwrap();
        assert!(restored.created_at.is_none());
    }

    #[tokio::test]
    async fn modify_and_modify_where() {
        let dir = TempDir::new().unwrap();
        let builders = Collection::<Builder>::spawn(engine(&dir), CollectionOptions::default());
        builders.add(Builder::new("b1", "One")).await.unwrap();
        builders.add(Builder::new("b2", "Two").mark_imported()).await.unwrap();

        let verified = builders.modify("b1", |b| b.verified = true).await.unwrap();
        assert!(verified.verified);

        let changed = builders
            .modify_where(|b| {
                if b.imported && !b.preserve_data {
                    b.preserve_data = true;
                    true
                } else {
                    false
                }
            })
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(builders.get("b2").await.unwrap().preserve_data);
        assert_eq!(builders.modify_where(|_| false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_add_aggregates_outcomes() {
        let dir = TempDir::new().unwrap();
        let builders = Collection::<Builder>::spawn(engine(&dir), CollectionOptions::default());
        builders
            .add(Builder::new("b1", "Existing").with_email("hello@existing.com"))
            .await
            .unwrap();

        let batch = vec![
            Builder::new("", "Fresh One").located("Berlin", "Germany"),
            Builder::new("", "Copycat").with_email("HELLO@existing.com"),
            Builder::new("", "Fresh One").located("berlin", "GERMANY"),
            Builder::new("", "Fresh Two").located("Paris", "France"),
        ];

        let mut ticks = Vec::new();
        let summary = builders
            .bulk_add(batch, |done, total| ticks.push((done, total)))
            .await;

        assert_eq!(summary.created, 2);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(ticks.last(), Some(&(4, 4)));
        assert_eq!(builders.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_records_survive_later_writes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine
            .write(
                "builders",
                &json!([
                    {"id": "b0", "companyName": "Legacy Co", "rating": "great"},
                    {"id": "b1", "companyName": "Fine Homes", "rating": 4.5}
                ]),
            )
            .unwrap();

        let builders = Collection::<Builder>::spawn(engine.clone(), CollectionOptions::default());
        assert_eq!(builders.count().await.unwrap(), 1);
        let stats = builders.stats().await.unwrap();
        assert_eq!(stats.unparsed, 1);
        assert!(!stats.read_only);

        builders.add(Builder::new("b2", "Second")).await.unwrap();
        builders.add(Builder::new("b3", "Third")).await.unwrap();

        let on_disk: Vec<Value> = engine.read("builders", Vec::new());
        assert_eq!(on_disk.len(), 4);
        let legacy = on_disk.iter().find(|v| v["id"] == "b0").unwrap();
        assert_eq!(legacy["rating"], "great");
        assert_eq!(legacy["companyName"], "Legacy Co");

        let backup = fs::read_to_string(engine.backup_path("builders").unwrap()).unwrap();
        assert!(backup.contains("Legacy Co"));

        // Raw records still own their ids.
        let err = builders.add(Builder::new("b0", "Impostor")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert!(!builders.insert_if_absent(Builder::new("b0", "Impostor")).await.unwrap());
    }

    #[tokio::test]
    async fn unloadable_document_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.write("leads", &json!({"not": "a list"})).unwrap();

        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        assert_eq!(leads.count().await.unwrap(), 0);
        assert!(leads.stats().await.unwrap().read_only);

        let err = leads.add(Lead::new("l1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(matches!(err, CollectionError::ReadOnly(_)));
        assert!(!leads.persist_cache().await.unwrap());

        let on_disk: Value = engine.read("leads", Value::Null);
        assert_eq!(on_disk, json!({"not": "a list"}));

        // Repaired on disk, a reload makes it writable again.
        engine.write("leads", &json!([])).unwrap();
        assert_eq!(leads.force_reload().await.unwrap(), 0);
        leads.add(Lead::new("l1")).await.unwrap();
        assert_eq!(leads.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persist_cache_rewrites_a_lost_document() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());
        assert!(!leads.persist_cache().await.unwrap());

        leads.add(Lead::new("l1")).await.unwrap();
        fs::remove_file(engine.primary_path("leads").unwrap()).unwrap();

        assert!(leads.persist_cache().await.unwrap());
        let on_disk: Vec<Lead> = engine.read("leads", Vec::new());
        assert_eq!(on_disk.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_adds_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let leads = Collection::<Lead>::spawn(engine.clone(), CollectionOptions::default());

        let mut tasks = Vec::new();
        for i in 0..50 {
            let handle = leads.clone();
            tasks.push(tokio::spawn(async move {
                handle.add(Lead::new(format!("l{i}"))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(leads.count().await.unwrap(), 50);
        let on_disk: Vec<Value> = engine.read("leads", Vec::new());
        assert_eq!(on_disk.len(), 50);
    }

    #[tokio::test]
    async fn reloadable_reports_document_name() {
        let dir = TempDir::new().unwrap();
        let leads = Collection::<Lead>::spawn(engine(&dir), CollectionOptions::default());
        let reloadable: Arc<dyn Reloadable> = Arc::new(leads.clone());
        assert_eq!(reloadable.document_name(), "leads");
        assert_eq!(reloadable.reload().await.unwrap(), 0);
    }
}
