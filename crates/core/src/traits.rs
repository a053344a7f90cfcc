//! Core traits for storage abstraction
//!
//! [`LocalDatabase`] is the uniform CRUD contract. The storage engine
//! implements it; the CAS engine and the consistency router are built on it;
//! consensus, quorum and replication collaborators extend it.

use crate::document::{Document, Fields};
use crate::error::Result;
use crate::schema::Schema;

/// Document CRUD surface
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait LocalDatabase: Send + Sync {
    /// Create a collection
    ///
    /// # Errors
    ///
    /// `CollectionExists` if the name is taken.
    fn create_collection(&self, name: &str, schema: Option<&Schema>) -> Result<()>;

    /// Delete a collection's metadata and every document in it
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` if there is nothing to drop.
    fn drop_collection(&self, name: &str) -> Result<()>;

    /// Insert a new document
    ///
    /// An empty id is replaced by a generated one. Returns the stored
    /// document with version 1 and fresh timestamps.
    ///
    /// # Errors
    ///
    /// `DocumentExists` if the id is taken.
    fn insert(&self, collection: &str, doc: Document) -> Result<Document>;

    /// Merge `fields` into an existing document
    ///
    /// Fields not mentioned are preserved; version grows by exactly 1.
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if the document is absent.
    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document>;

    /// Remove a document
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if the document is absent.
    fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Fetch a document
    ///
    /// # Errors
    ///
    /// `DocumentNotFound` if the document is absent.
    fn get(&self, collection: &str, id: &str) -> Result<Document>;

    /// Documents whose fields match every entry of `filter`
    ///
    /// Matching uses numeric-normalizing equality. `limit == 0` means no
    /// limit; `offset` counts matching documents. Results are in id order.
    fn query(
        &self,
        collection: &str,
        filter: &Fields,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>>;

    /// Number of live documents in a collection
    fn count(&self, collection: &str) -> Result<usize>;

    /// Release resources; later calls fail with `Closed`
    fn close(&self) -> Result<()>;
}
