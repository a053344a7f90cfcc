//! Striped per-document locks
//!
//! Every `(collection, id)` hashes onto one of a fixed set of mutexes. Two
//! documents may share a stripe, which only costs concurrency; one document
//! always maps to the same stripe.

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Default number of stripes
pub const DEFAULT_STRIPES: usize = 256;

/// Fixed-size table of document locks
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

impl KeyLocks {
    /// Create `stripes` locks (at least one)
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; there is at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Block until the document's stripe is held
    pub fn lock(&self, collection: &str, id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(collection, id)].lock()
    }

    fn stripe(&self, collection: &str, id: &str) -> usize {
        let mut hasher = FxHasher::default();
        collection.hash(&mut hasher);
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
