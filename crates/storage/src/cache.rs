//! Bounded read cache for documents
//!
//! Cache-aside: reads check here first and fill on miss, writes refresh the
//! entry after their durable commit.
//!
//! # Design
//!
//! - One `RwLock` guards the whole cache: hits take the read side, every
//!   mutation takes the write side.
//! - Entries are grouped per collection so a dropped collection can be
//!   invalidated in one step.
//! - Eviction is insertion-ordered. Each slot carries a sequence number; the
//!   order queue may hold stale sequence numbers, which are skipped.
//! - A delete leaves a `Removed` marker so a reader that fetched the record
//!   before the delete cannot re-fill it afterwards.

use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use velocity_core::Document;

/// Cache counters snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that fell through to the durable engine
    pub misses: u64,
    /// Slots currently held (documents and delete markers)
    pub entries: usize,
}

#[derive(Debug)]
enum Entry {
    Live(Arc<Document>),
    Removed,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    entry: Entry,
}

#[derive(Debug, Default)]
struct CacheInner {
    collections: FxHashMap<String, FxHashMap<String, Slot>>,
    order: VecDeque<(String, String, u64)>,
    next_seq: u64,
    len: usize,
}

impl CacheInner {
    fn set(&mut self, collection: &str, id: &str, entry: Entry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slots = self
            .collections
            .entry(collection.to_string())
            .or_default();
        if slots
            .insert(id.to_string(), Slot { seq, entry })
            .is_none()
        {
            self.len += 1;
        }
        self.order
            .push_back((collection.to_string(), id.to_string(), seq));
    }

    fn slot(&self, collection: &str, id: &str) -> Option<&Slot> {
        self.collections.get(collection)?.get(id)
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.len > capacity {
            let Some((collection, id, seq)) = self.order.pop_front() else {
                break;
            };
            if let Some(slots) = self.collections.get_mut(&collection) {
                if slots.get(&id).is_some_and(|slot| slot.seq == seq) {
                    slots.remove(&id);
                    self.len -= 1;
                    if slots.is_empty() {
                        self.collections.remove(&collection);
                    }
                }
            }
        }

        // Rewrites leave stale queue entries behind; drop them once they dominate
        if self.order.len() > capacity.saturating_mul(2) + 64 {
            let collections = &self.collections;
            self.order.retain(|(collection, id, seq)| {
                collections
                    .get(collection)
                    .and_then(|slots| slots.get(id))
                    .is_some_and(|slot| slot.seq == *seq)
            });
        }
    }
}

/// Bounded, thread-safe document cache
#[derive(Debug)]
pub struct DocumentCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DocumentCache {
    /// Create a cache holding at most `capacity` slots (0 disables caching)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether the cache stores anything at all
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Cached copy of a live, unexpired document
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        if !self.is_enabled() {
            return None;
        }
        let inner = self.inner.read();
        let hit = match inner.slot(collection, id).map(|slot| &slot.entry) {
            Some(Entry::Live(doc)) if !doc.is_expired(Utc::now()) => Some(Document::clone(doc)),
            _ => None,
        };
        drop(inner);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Refresh after a committed write
    ///
    /// Writers call this in commit order, so it overwrites unconditionally.
    pub fn put(&self, collection: &str, doc: &Document) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.write();
        inner.set(collection, &doc.id, Entry::Live(Arc::new(doc.clone())));
        inner.evict_to(self.capacity);
    }

    /// Populate after a read miss
    ///
    /// Refuses to replace a newer version or a delete marker, since the
    /// reader's snapshot may predate a concurrent write.
    pub fn fill(&self, collection: &str, doc: &Document) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.write();
        let stale = match inner.slot(collection, &doc.id).map(|slot| &slot.entry) {
            Some(Entry::Removed) => true,
            Some(Entry::Live(cached)) => cached.version >= doc.version,
            None => false,
        };
        if !stale {
            inner.set(collection, &doc.id, Entry::Live(Arc::new(doc.clone())));
            inner.evict_to(self.capacity);
        }
    }

    /// Mark a document as deleted
    pub fn remove(&self, collection: &str, id: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.write();
        inner.set(collection, id, Entry::Removed);
        inner.evict_to(self.capacity);
    }

    /// Forget everything cached for a collection
    pub fn invalidate_collection(&self, collection: &str) {
        let mut inner = self.inner.write();
        if let Some(slots) = inner.collections.remove(collection) {
            inner.len -= slots.len();
        }
        inner.order.retain(|(c, _, _)| c != collection);
    }

    /// Forget everything
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = CacheInner::default();
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.read().len,
        }
    }
}
