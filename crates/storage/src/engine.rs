//! Durable, cached, versioned document store
//!
//! `StorageEngine` keeps every record in an embedded ordered key-value
//! engine (redb) and fronts reads with a bounded [`DocumentCache`].
//!
//! # Layout
//!
//! - `collections` table: collection name → `{name, schema, created}`
//! - `documents` table: `(collection, id)` → `{id, fields, version, created,
//!   modified[, expires_at]}`
//!
//! Tuple keys sort by collection first, so a collection's documents form one
//! contiguous key range.
//!
//! # Locking
//!
//! - `db: RwLock<Option<Database>>` is the engine-level lock. Document
//!   operations hold the shared side; create/drop collection, compaction
//!   and close hold the exclusive side, so a drop never races document
//!   writes into the collection it is dropping.
//! - `write_lock` orders "commit, then refresh cache" across writers. The
//!   durable engine admits one write transaction at a time anyway, so it
//!   costs no concurrency.
//!
//! # Consistency
//!
//! Reads are cache-first. A reader may see a document that is stale relative
//! to a concurrent durable write until the writer's cache refresh completes.

use chrono::{DateTime, Utc};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use redb::backends::InMemoryBackend;
use redb::{Builder, Database, Durability, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use velocity_core::{Document, Error, Fields, LocalDatabase, Result, Schema};

use crate::cache::{CacheStats, DocumentCache};
use crate::config::StorageConfig;
use crate::reclaimer::Reclaimer;

type DocKey = (&'static str, &'static str);

const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");
const DOCUMENTS: TableDefinition<DocKey, &[u8]> = TableDefinition::new("documents");

/// Persisted collection record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name
    pub name: String,
    /// Declared schema, if any
    pub schema: Option<Schema>,
    /// Creation time
    pub created: DateTime<Utc>,
}

/// The storage engine
pub struct StorageEngine {
    db: RwLock<Option<Database>>,
    write_lock: Mutex<()>,
    cache: DocumentCache,
    config: StorageConfig,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl StorageEngine {
    /// Open (or create) the engine described by `config`
    ///
    /// Starts the background reclaimer unless `reclaim_interval_ms` is 0.
    ///
    /// # Errors
    ///
    /// `Config` if neither `data_dir` nor `in_memory` is set; `Io` or
    /// `Storage` if the durable store cannot be opened.
    pub fn open(config: StorageConfig) -> Result<Arc<Self>> {
        let mut builder = Builder::new();
        builder.set_cache_size(config.cache_size_mb.saturating_mul(1024 * 1024));

        let db = if config.in_memory {
            builder
                .create_with_backend(InMemoryBackend::new())
                .map_err(Error::storage)?
        } else {
            let path = config.data_file().ok_or_else(|| {
                Error::Config("data_dir is required unless in_memory is set".to_string())
            })?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            builder.create(&path).map_err(Error::storage)?
        };

        // Both tables exist from here on, so read transactions can open them
        let txn = db.begin_write().map_err(Error::storage)?;
        txn.open_table(COLLECTIONS).map_err(Error::storage)?;
        txn.open_table(DOCUMENTS).map_err(Error::storage)?;
        txn.commit().map_err(Error::storage)?;

        info!(
            target: "velocity::storage",
            in_memory = config.in_memory,
            data_dir = ?config.data_dir,
            cache_capacity = config.cache_capacity,
            "Storage engine opened"
        );

        let engine = Arc::new(Self {
            db: RwLock::new(Some(db)),
            write_lock: Mutex::new(()),
            cache: DocumentCache::new(config.cache_capacity),
            config,
            reclaimer: Mutex::new(None),
        });

        if engine.config.reclaim_interval_ms > 0 {
            let reclaimer = Reclaimer::start(
                Arc::downgrade(&engine),
                engine.config.reclaim_interval(),
                engine.config.reclaim_batch_size,
            )?;
            *engine.reclaimer.lock() = Some(reclaimer);
        }

        Ok(engine)
    }

    /// In-memory engine with default settings
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::open(StorageConfig::in_memory())
    }

    /// Effective configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Persist collection metadata
    ///
    /// # Errors
    ///
    /// `CollectionExists` if the name is taken.
    pub fn create_collection(&self, name: &str, schema: Option<&Schema>) -> Result<()> {
        let db = self.exclusive_db()?;
        let txn = self.begin_write(&db)?;
        {
            let mut table = txn.open_table(COLLECTIONS).map_err(Error::storage)?;
            if table.get(name).map_err(Error::storage)?.is_some() {
                return Err(Error::CollectionExists(name.to_string()));
            }
            let metadata = CollectionMetadata {
                name: name.to_string(),
                schema: schema.cloned(),
                created: Utc::now(),
            };
            let bytes = encode(&metadata)?;
            table
                .insert(name, bytes.as_slice())
                .map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)?;

        info!(target: "velocity::storage", collection = name, "Collection created");
        Ok(())
    }

    /// Delete a collection's metadata and every document under its prefix
    ///
    /// Runs in one durable transaction under the exclusive engine lock, then
    /// invalidates the collection's cache entries.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` if there is neither metadata nor any document.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let db = self.exclusive_db()?;
        let txn = self.begin_write(&db)?;
        let removed = {
            let mut documents = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
            let ids = collect_ids(&documents, name)?;
            for id in &ids {
                documents
                    .remove((name, id.as_str()))
                    .map_err(Error::storage)?;
            }

            let mut collections = txn.open_table(COLLECTIONS).map_err(Error::storage)?;
            let had_metadata = collections.remove(name).map_err(Error::storage)?.is_some();
            if !had_metadata && ids.is_empty() {
                return Err(Error::CollectionNotFound(name.to_string()));
            }
            ids.len()
        };
        txn.commit().map_err(Error::storage)?;
        self.cache.invalidate_collection(name);

        info!(
            target: "velocity::storage",
            collection = name,
            documents_removed = removed,
            "Collection dropped"
        );
        Ok(())
    }

    /// Metadata of one collection
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` if no metadata record exists.
    pub fn collection(&self, name: &str) -> Result<CollectionMetadata> {
        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(COLLECTIONS).map_err(Error::storage)?;
        let bytes = table
            .get(name)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        decode(bytes.value())
    }

    /// Metadata of every collection, in name order
    pub fn list_collections(&self) -> Result<Vec<CollectionMetadata>> {
        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(COLLECTIONS).map_err(Error::storage)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(Error::storage)? {
            let (_, value) = entry.map_err(Error::storage)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Insert a new document (version 1, created = modified = now)
    ///
    /// An empty id is replaced by a UUID. An expired record with the same id
    /// is overwritten.
    ///
    /// # Errors
    ///
    /// `DocumentExists` if a live record has the id.
    pub fn insert(&self, collection: &str, doc: Document) -> Result<Document> {
        let mut doc = doc;
        if doc.id.is_empty() {
            doc.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        doc.version = 1;
        doc.created = now;
        doc.modified = now;
        if doc.expires_at.is_none() {
            doc.expires_at = self.expiry_from(now);
        }
        let bytes = encode(&doc)?;

        let db = self.shared_db()?;
        let _serial = self.write_lock.lock();
        let txn = self.begin_write(&db)?;
        {
            let mut table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
            if let Some(existing) = load(&table, collection, &doc.id)? {
                if !existing.is_expired(now) {
                    return Err(Error::document_exists(collection, &doc.id));
                }
            }
            table
                .insert((collection, doc.id.as_str()), bytes.as_slice())
                .map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)?;
        self.cache.put(collection, &doc);

        debug!(target: "velocity::storage", collection, id = %doc.id, "Document inserted");
        Ok(doc)
    }

    /// Merge `fields` into a document, bumping its version by one
    ///
    /// Read, merge and write happen in one durable transaction.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if there is no live record.
    pub fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document> {
        let now = Utc::now();

        let db = self.shared_db()?;
        let _serial = self.write_lock.lock();
        let txn = self.begin_write(&db)?;
        let doc = {
            let mut table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
            let mut doc = match load(&table, collection, id)? {
                Some(doc) if !doc.is_expired(now) => doc,
                _ => return Err(Error::document_not_found(collection, id)),
            };
            doc.merge_fields(fields);
            doc.version += 1;
            doc.modified = now;
            if let Some(at) = self.expiry_from(now) {
                doc.expires_at = Some(at);
            }
            let bytes = encode(&doc)?;
            table
                .insert((collection, id), bytes.as_slice())
                .map_err(Error::storage)?;
            doc
        };
        txn.commit().map_err(Error::storage)?;
        self.cache.put(collection, &doc);

        debug!(
            target: "velocity::storage",
            collection,
            id,
            version = doc.version,
            "Document updated"
        );
        Ok(doc)
    }

    /// Remove a document
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if there is no live record.
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let now = Utc::now();

        let db = self.shared_db()?;
        let _serial = self.write_lock.lock();
        let txn = self.begin_write(&db)?;
        {
            let mut table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
            match load(&table, collection, id)? {
                Some(doc) if !doc.is_expired(now) => {}
                _ => return Err(Error::document_not_found(collection, id)),
            }
            table.remove((collection, id)).map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)?;
        self.cache.remove(collection, id);

        debug!(target: "velocity::storage", collection, id, "Document deleted");
        Ok(())
    }

    /// Fetch a document, cache first
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if there is no live record.
    pub fn get(&self, collection: &str, id: &str) -> Result<Document> {
        if let Some(doc) = self.cache.get(collection, id) {
            return Ok(doc);
        }

        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
        match load(&table, collection, id)? {
            Some(doc) if !doc.is_expired(Utc::now()) => {
                self.cache.fill(collection, &doc);
                Ok(doc)
            }
            _ => Err(Error::document_not_found(collection, id)),
        }
    }

    /// Documents matching every entry of `filter`, in id order
    ///
    /// Bypasses the cache. `limit == 0` means unlimited; `offset` counts
    /// matching documents. Undecodable records are logged and skipped.
    pub fn query(
        &self,
        collection: &str,
        filter: &Fields,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>> {
        let now = Utc::now();
        let mut out = Vec::new();
        let mut skipped = 0;

        self.scan(collection, |doc| {
            if doc.is_expired(now) || !matches_filter(&doc, filter) {
                return true;
            }
            if skipped < offset {
                skipped += 1;
                return true;
            }
            out.push(doc);
            limit == 0 || out.len() < limit
        })?;

        Ok(out)
    }

    /// Number of live documents in a collection
    pub fn count(&self, collection: &str) -> Result<usize> {
        let now = Utc::now();
        let mut count = 0;
        self.scan(collection, |doc| {
            if !doc.is_expired(now) {
                count += 1;
            }
            true
        })?;
        Ok(count)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete expired records in batches of `batch_size`
    ///
    /// Each batch is its own durable transaction, so foreground writers wait
    /// at most one batch. Returns the number of records removed.
    pub fn reclaim_expired(&self, batch_size: usize) -> Result<usize> {
        let now = Utc::now();
        let expired = self.find_expired(now)?;
        let mut removed = 0;
        for chunk in expired.chunks(batch_size.max(1)) {
            removed += self.remove_expired(chunk, now)?;
        }
        if removed > 0 {
            info!(target: "velocity::reclaim", removed, "Expired records reclaimed");
        }
        Ok(removed)
    }

    /// Compact the durable store if the engine lock is free right now
    ///
    /// Never waits for the lock, but holds it exclusively for the whole
    /// compaction, so every other call waits until it finishes. The reclaimer
    /// never calls this. Returns whether compaction ran to completion.
    pub fn compact(&self) -> Result<bool> {
        let Some(guard) = self.db.try_write() else {
            debug!(target: "velocity::reclaim", "Engine busy, compaction skipped");
            return Ok(false);
        };
        let mut db =
            RwLockWriteGuard::try_map(guard, |db| db.as_mut()).map_err(|_| Error::Closed)?;
        let compacted = db.compact().map_err(Error::storage)?;
        if compacted {
            info!(target: "velocity::reclaim", "Durable store compacted");
        }
        Ok(compacted)
    }

    /// Open a read transaction on both tables
    pub fn health(&self) -> Result<()> {
        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        txn.open_table(COLLECTIONS).map_err(Error::storage)?;
        txn.open_table(DOCUMENTS).map_err(Error::storage)?;
        Ok(())
    }

    /// Read-cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stop the reclaimer, clear the cache and release the durable store
    ///
    /// Buffered commits are made durable first, then on-disk stores are
    /// compacted when `compact_on_close` is set. Either failing is logged and
    /// does not fail the close. Idempotent. Every later call fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        if let Some(reclaimer) = self.reclaimer.lock().take() {
            reclaimer.stop();
        }

        let mut db = self.db.write();
        if !self.config.sync_writes && !self.config.in_memory {
            if let Some(db) = db.as_ref() {
                // An empty durable commit persists every buffered one
                let flushed = db.begin_write().map_err(Error::storage).and_then(|mut txn| {
                    txn.set_durability(Durability::Immediate);
                    txn.commit().map_err(Error::storage)
                });
                if let Err(e) = flushed {
                    warn!(target: "velocity::storage", error = %e, "Final flush failed");
                }
            }
        }
        if self.config.compact_on_close && !self.config.in_memory {
            if let Some(db) = db.as_mut() {
                match db.compact() {
                    Ok(true) => info!(target: "velocity::storage", "Durable store compacted"),
                    Ok(false) => {}
                    Err(e) => warn!(target: "velocity::storage", error = %e, "Compaction failed"),
                }
            }
        }
        if db.take().is_some() {
            self.cache.clear();
            info!(target: "velocity::storage", "Storage engine closed");
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn shared_db(&self) -> Result<MappedRwLockReadGuard<'_, Database>> {
        RwLockReadGuard::try_map(self.db.read(), |db| db.as_ref()).map_err(|_| Error::Closed)
    }

    fn exclusive_db(&self) -> Result<MappedRwLockWriteGuard<'_, Database>> {
        RwLockWriteGuard::try_map(self.db.write(), |db| db.as_mut()).map_err(|_| Error::Closed)
    }

    fn begin_write(&self, db: &Database) -> Result<WriteTransaction> {
        let mut txn = db.begin_write().map_err(Error::storage)?;
        txn.set_durability(if self.config.sync_writes {
            Durability::Immediate
        } else {
            Durability::Eventual
        });
        Ok(txn)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.config.ttl()?).ok()?;
        now.checked_add_signed(ttl)
    }

    /// Visit a collection's records in id order until `visit` returns false
    fn scan<F>(&self, collection: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(Document) -> bool,
    {
        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
        let start: (&str, &str) = (collection, "");
        for entry in table.range(start..).map_err(Error::storage)? {
            let (key, value) = entry.map_err(Error::storage)?;
            let (key_collection, key_id) = key.value();
            if key_collection != collection {
                break;
            }
            match decode::<Document>(value.value()) {
                Ok(doc) => {
                    if !visit(doc) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        target: "velocity::storage",
                        collection,
                        id = key_id,
                        error = %e,
                        "Skipping undecodable record"
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let db = self.shared_db()?;
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
        let mut expired = Vec::new();
        for entry in table.iter().map_err(Error::storage)? {
            let (key, value) = entry.map_err(Error::storage)?;
            if let Ok(doc) = decode::<Document>(value.value()) {
                if doc.is_expired(now) {
                    let (collection, id) = key.value();
                    expired.push((collection.to_string(), id.to_string()));
                }
            }
        }
        Ok(expired)
    }

    fn remove_expired(&self, keys: &[(String, String)], now: DateTime<Utc>) -> Result<usize> {
        let db = self.shared_db()?;
        let _serial = self.write_lock.lock();
        let txn = self.begin_write(&db)?;
        let mut removed = Vec::with_capacity(keys.len());
        {
            let mut table = txn.open_table(DOCUMENTS).map_err(Error::storage)?;
            for (collection, id) in keys {
                // Re-check: the record may have been rewritten since the scan
                let still_expired = load(&table, collection, id)?
                    .is_some_and(|doc| doc.is_expired(now));
                if still_expired {
                    table
                        .remove((collection.as_str(), id.as_str()))
                        .map_err(Error::storage)?;
                    removed.push((collection, id));
                }
            }
        }
        txn.commit().map_err(Error::storage)?;
        for (collection, id) in &removed {
            self.cache.remove(collection, id);
        }
        Ok(removed.len())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.get_mut().take() {
            reclaimer.stop();
        }
    }
}

impl LocalDatabase for StorageEngine {
    fn create_collection(&self, name: &str, schema: Option<&Schema>) -> Result<()> {
        StorageEngine::create_collection(self, name, schema)
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        StorageEngine::drop_collection(self, name)
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<Document> {
        StorageEngine::insert(self, collection, doc)
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document> {
        StorageEngine::update(self, collection, id, fields)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        StorageEngine::delete(self, collection, id)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Document> {
        StorageEngine::get(self, collection, id)
    }

    fn query(
        &self,
        collection: &str,
        filter: &Fields,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>> {
        StorageEngine::query(self, collection, filter, limit, offset)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        StorageEngine::count(self, collection)
    }

    fn close(&self) -> Result<()> {
        StorageEngine::close(self)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(Error::serialization)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(Error::serialization)
}

fn load<T>(table: &T, collection: &str, id: &str) -> Result<Option<Document>>
where
    T: ReadableTable<DocKey, &'static [u8]>,
{
    match table.get((collection, id)).map_err(Error::storage)? {
        Some(bytes) => Ok(Some(decode(bytes.value())?)),
        None => Ok(None),
    }
}

fn collect_ids<T>(table: &T, collection: &str) -> Result<Vec<String>>
where
    T: ReadableTable<DocKey, &'static [u8]>,
{
    let start: (&str, &str) = (collection, "");
    let mut ids = Vec::new();
    for entry in table.range(start..).map_err(Error::storage)? {
        let (key, _) = entry.map_err(Error::storage)?;
        let (key_collection, id) = key.value();
        if key_collection != collection {
            break;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// A null filter value matches an absent field
fn matches_filter(doc: &Document, filter: &Fields) -> bool {
    filter.iter().all(|(name, expected)| match doc.fields.get(name) {
        Some(actual) => actual.loosely_eq(expected),
        None => expected.is_null(),
    })
}
