//! Consistency router
//!
//! Selects a backend per call from the requested [`ConsistencyLevel`]:
//!
//! | Level    | Writes                                        | Reads                 |
//! |----------|-----------------------------------------------|-----------------------|
//! | Local    | local store                                   | local store           |
//! | Eventual | local store, then `async_replicate`           | local store           |
//! | Quorum   | `quorum_write` (updates read-merge-write)     | `quorum_read`         |
//! | Strong   | `propose_operation` + `wait_for_apply`        | consensus store `get` |
//!
//! A level whose collaborator is not configured fails with
//! `UnsupportedConsistency`; the router never falls back to a weaker level.
//! `create_collection` at Quorum or Eventual goes through consensus whenever
//! a consensus collaborator exists.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use velocity_core::{
    ConsistencyLevel, Document, Error, Fields, LocalDatabase, Result, Schema,
};

use crate::collaborators::{
    EventualDatabase, Operation, QuorumDatabase, RaftDatabase, ReplicationStatus,
};
use crate::config::RouterConfig;

/// Store serving one call
enum Backend<'a> {
    Local(&'a dyn LocalDatabase),
    Raft(&'a dyn RaftDatabase),
    Quorum(&'a dyn QuorumDatabase),
    Eventual(&'a dyn EventualDatabase),
}

/// Run `$call` against whichever store `$backend` holds
macro_rules! on_backend {
    ($backend:expr, $db:ident => $call:expr) => {
        match $backend {
            Backend::Local($db) => $call,
            Backend::Raft($db) => $call,
            Backend::Quorum($db) => $call,
            Backend::Eventual($db) => $call,
        }
    };
}

/// Routes CRUD calls to the backend serving each consistency level
pub struct DatabaseRouter {
    local: Arc<dyn LocalDatabase>,
    raft: Option<Arc<dyn RaftDatabase>>,
    quorum: Option<Arc<dyn QuorumDatabase>>,
    eventual: Option<Arc<dyn EventualDatabase>>,
    config: RouterConfig,
}

/// Builder for [`DatabaseRouter`]
pub struct DatabaseRouterBuilder {
    local: Arc<dyn LocalDatabase>,
    raft: Option<Arc<dyn RaftDatabase>>,
    quorum: Option<Arc<dyn QuorumDatabase>>,
    eventual: Option<Arc<dyn EventualDatabase>>,
    config: RouterConfig,
}

impl DatabaseRouterBuilder {
    /// Consensus collaborator for the Strong level
    pub fn raft(mut self, raft: Arc<dyn RaftDatabase>) -> Self {
        self.raft = Some(raft);
        self
    }

    /// Quorum collaborator for the Quorum level
    pub fn quorum(mut self, quorum: Arc<dyn QuorumDatabase>) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Replication collaborator for the Eventual level
    pub fn eventual(mut self, eventual: Arc<dyn EventualDatabase>) -> Self {
        self.eventual = Some(eventual);
        self
    }

    /// Router settings (defaults otherwise)
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the settings and build the router
    pub fn build(self) -> Result<DatabaseRouter> {
        self.config.validate()?;
        info!(
            target: "velocity::router",
            node_id = %self.config.node_id,
            default = %self.config.default_consistency,
            strong = self.raft.is_some(),
            quorum = self.quorum.is_some(),
            eventual = self.eventual.is_some(),
            "Router configured"
        );
        Ok(DatabaseRouter {
            local: self.local,
            raft: self.raft,
            quorum: self.quorum,
            eventual: self.eventual,
            config: self.config,
        })
    }
}

impl DatabaseRouter {
    /// Start building a router over `local`
    pub fn builder(local: Arc<dyn LocalDatabase>) -> DatabaseRouterBuilder {
        DatabaseRouterBuilder {
            local,
            raft: None,
            quorum: None,
            eventual: None,
            config: RouterConfig::default(),
        }
    }

    /// Router with only the Local level available
    pub fn local_only(local: Arc<dyn LocalDatabase>) -> Self {
        Self {
            local,
            raft: None,
            quorum: None,
            eventual: None,
            config: RouterConfig::default(),
        }
    }

    /// Settings in effect
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Level used by the `LocalDatabase` surface
    pub fn default_consistency(&self) -> ConsistencyLevel {
        self.config.default_consistency
    }

    /// Whether `level` has the collaborator it needs
    pub fn supports(&self, level: ConsistencyLevel) -> bool {
        match level {
            ConsistencyLevel::Local => true,
            ConsistencyLevel::Eventual => self.eventual.is_some(),
            ConsistencyLevel::Quorum => self.quorum.is_some(),
            ConsistencyLevel::Strong => self.raft.is_some(),
        }
    }

    /// Whether this node leads the consensus group (`None` without one)
    pub fn is_leader(&self) -> Option<bool> {
        self.raft.as_ref().map(|raft| raft.is_leader())
    }

    // ========================================================================
    // Level-qualified operations
    // ========================================================================

    /// Insert `doc` at `level`, returning the stored document
    ///
    /// Replicated levels assign the id here so every replica agrees on it.
    pub fn insert_at(
        &self,
        collection: &str,
        doc: Document,
        level: ConsistencyLevel,
    ) -> Result<Document> {
        debug!(target: "velocity::router", collection, %level, "insert");
        match level {
            ConsistencyLevel::Local => self.local.insert(collection, doc),
            ConsistencyLevel::Strong => {
                let raft = self.raft()?;
                let doc = stamp_new(doc);
                let id = doc.id.clone();
                self.commit_strong(raft, Operation::insert(collection, doc, self.node_id()))?;
                raft.get(collection, &id)
            }
            ConsistencyLevel::Quorum => {
                let quorum = self.quorum()?;
                let doc = stamp_new(doc);
                match quorum.quorum_read(collection, &doc.id, self.config.quorum_size) {
                    Ok(existing) if !existing.is_expired(Utc::now()) => {
                        return Err(Error::document_exists(collection, &doc.id));
                    }
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                quorum.quorum_write(collection, &doc, self.config.quorum_size)?;
                Ok(doc)
            }
            ConsistencyLevel::Eventual => {
                let eventual = self.eventual()?;
                let mut doc = doc;
                if doc.id.is_empty() {
                    doc.id = Uuid::new_v4().to_string();
                }
                let stored = self.local.insert(collection, doc)?;
                self.replicate(
                    eventual,
                    Operation::insert(collection, stored.clone(), self.node_id()),
                )?;
                Ok(stored)
            }
        }
    }

    /// Merge `fields` into `id` at `level`, returning the new document
    pub fn update_at(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        level: ConsistencyLevel,
    ) -> Result<Document> {
        debug!(target: "velocity::router", collection, id, %level, "update");
        match level {
            ConsistencyLevel::Local => self.local.update(collection, id, fields),
            ConsistencyLevel::Strong => {
                let raft = self.raft()?;
                self.commit_strong(raft, Operation::update(collection, id, fields, self.node_id()))?;
                raft.get(collection, id)
            }
            ConsistencyLevel::Quorum => {
                let quorum = self.quorum()?;
                let mut doc = quorum.quorum_read(collection, id, self.config.quorum_size)?;
                if doc.is_expired(Utc::now()) {
                    return Err(Error::document_not_found(collection, id));
                }
                doc.merge_fields(fields);
                doc.version += 1;
                doc.modified = Utc::now();
                quorum.quorum_write(collection, &doc, self.config.quorum_size)?;
                Ok(doc)
            }
            ConsistencyLevel::Eventual => {
                let eventual = self.eventual()?;
                let stored = self.local.update(collection, id, fields.clone())?;
                self.replicate(
                    eventual,
                    Operation::update(collection, id, fields, self.node_id()),
                )?;
                Ok(stored)
            }
        }
    }

    /// Delete `id` at `level`
    pub fn delete_at(&self, collection: &str, id: &str, level: ConsistencyLevel) -> Result<()> {
        debug!(target: "velocity::router", collection, id, %level, "delete");
        match level {
            ConsistencyLevel::Local => self.local.delete(collection, id),
            ConsistencyLevel::Strong => {
                let raft = self.raft()?;
                self.commit_strong(raft, Operation::delete(collection, id, self.node_id()))
            }
            ConsistencyLevel::Quorum => self.quorum()?.delete(collection, id),
            ConsistencyLevel::Eventual => {
                let eventual = self.eventual()?;
                self.local.delete(collection, id)?;
                self.replicate(eventual, Operation::delete(collection, id, self.node_id()))
            }
        }
    }

    /// Fetch `id` at `level`
    pub fn get_at(&self, collection: &str, id: &str, level: ConsistencyLevel) -> Result<Document> {
        match level {
            ConsistencyLevel::Local => self.local.get(collection, id),
            ConsistencyLevel::Strong => self.raft()?.get(collection, id),
            ConsistencyLevel::Quorum => {
                self.quorum()?
                    .quorum_read(collection, id, self.config.quorum_size)
            }
            ConsistencyLevel::Eventual => {
                self.eventual()?;
                self.local.get(collection, id)
            }
        }
    }

    /// Query `collection` at `level`
    pub fn query_at(
        &self,
        collection: &str,
        filter: &Fields,
        limit: usize,
        offset: usize,
        level: ConsistencyLevel,
    ) -> Result<Vec<Document>> {
        on_backend!(self.backend(level)?, db => db.query(collection, filter, limit, offset))
    }

    /// Count live documents at `level`
    pub fn count_at(&self, collection: &str, level: ConsistencyLevel) -> Result<usize> {
        on_backend!(self.backend(level)?, db => db.count(collection))
    }

    /// Create a collection at `level`
    ///
    /// Quorum and Eventual escalate to consensus when it is configured.
    pub fn create_collection_at(
        &self,
        name: &str,
        schema: Option<&Schema>,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let backend = match (level, &self.raft) {
            (ConsistencyLevel::Local, _) => Backend::Local(self.local.as_ref()),
            (ConsistencyLevel::Strong, _) => Backend::Raft(self.raft()?.as_ref()),
            (ConsistencyLevel::Quorum | ConsistencyLevel::Eventual, Some(raft)) => {
                debug!(
                    target: "velocity::router",
                    collection = name,
                    %level,
                    "Escalating collection create to consensus"
                );
                Backend::Raft(raft.as_ref())
            }
            (ConsistencyLevel::Quorum, None) => Backend::Quorum(self.quorum()?.as_ref()),
            (ConsistencyLevel::Eventual, None) => {
                self.eventual()?;
                Backend::Local(self.local.as_ref())
            }
        };
        on_backend!(backend, db => db.create_collection(name, schema))
    }

    /// Drop a collection on the backend serving `level`
    pub fn drop_collection_at(&self, name: &str, level: ConsistencyLevel) -> Result<()> {
        on_backend!(self.backend(level)?, db => db.drop_collection(name))
    }

    /// Backlog of the Eventual collaborator
    pub fn replication_status(&self) -> Result<ReplicationStatus> {
        self.eventual()?.replication_status()
    }

    /// Close every configured backend
    ///
    /// All backends are attempted; failures are collected into
    /// `Error::Close`.
    pub fn close(&self) -> Result<()> {
        let mut backends = vec![("local", Backend::Local(self.local.as_ref()))];
        if let Some(raft) = &self.raft {
            backends.push(("raft", Backend::Raft(raft.as_ref())));
        }
        if let Some(quorum) = &self.quorum {
            backends.push(("quorum", Backend::Quorum(quorum.as_ref())));
        }
        if let Some(eventual) = &self.eventual {
            backends.push(("eventual", Backend::Eventual(eventual.as_ref())));
        }

        let mut errors = Vec::new();
        for (name, backend) in backends {
            if let Err(e) = on_backend!(backend, db => db.close()) {
                warn!(target: "velocity::router", backend = name, error = %e, "Close failed");
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Close(errors))
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn node_id(&self) -> &str {
        &self.config.node_id
    }

    fn raft(&self) -> Result<&Arc<dyn RaftDatabase>> {
        self.raft.as_ref().ok_or_else(|| {
            Error::unsupported(
                ConsistencyLevel::Strong,
                "no consensus collaborator configured",
            )
        })
    }

    fn quorum(&self) -> Result<&Arc<dyn QuorumDatabase>> {
        self.quorum.as_ref().ok_or_else(|| {
            Error::unsupported(
                ConsistencyLevel::Quorum,
                "no quorum collaborator configured",
            )
        })
    }

    fn eventual(&self) -> Result<&Arc<dyn EventualDatabase>> {
        self.eventual.as_ref().ok_or_else(|| {
            Error::unsupported(
                ConsistencyLevel::Eventual,
                "no replication collaborator configured",
            )
        })
    }

    /// Store answering reads and collection calls at `level`
    fn backend(&self, level: ConsistencyLevel) -> Result<Backend<'_>> {
        Ok(match level {
            ConsistencyLevel::Local => Backend::Local(self.local.as_ref()),
            ConsistencyLevel::Strong => Backend::Raft(self.raft()?.as_ref()),
            ConsistencyLevel::Quorum => Backend::Quorum(self.quorum()?.as_ref()),
            ConsistencyLevel::Eventual => {
                self.eventual()?;
                Backend::Local(self.local.as_ref())
            }
        })
    }

    fn commit_strong(&self, raft: &Arc<dyn RaftDatabase>, op: Operation) -> Result<()> {
        let index = raft.propose_operation(&op)?;
        raft.wait_for_apply(index, self.config.apply_timeout())?;
        debug!(
            target: "velocity::router",
            collection = %op.collection,
            index,
            "Strong write applied"
        );
        Ok(())
    }

    /// Enqueue after a local write; the local write stays applied on failure
    fn replicate(&self, eventual: &Arc<dyn EventualDatabase>, op: Operation) -> Result<()> {
        eventual.async_replicate(&op).map_err(|e| {
            warn!(
                target: "velocity::router",
                collection = %op.collection,
                id = ?op.target_id(),
                error = %e,
                "Replication enqueue failed"
            );
            match e {
                Error::Replication(_) => e,
                other => Error::Replication(other.to_string()),
            }
        })
    }
}

/// Assign id, version and timestamps before a document leaves the node
fn stamp_new(mut doc: Document) -> Document {
    if doc.id.is_empty() {
        doc.id = Uuid::new_v4().to_string();
    }
    let now = Utc::now();
    doc.version = 1;
    doc.created = now;
    doc.modified = now;
    doc
}

impl LocalDatabase for DatabaseRouter {
    fn create_collection(&self, name: &str, schema: Option<&Schema>) -> Result<()> {
        self.create_collection_at(name, schema, self.default_consistency())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.drop_collection_at(name, self.default_consistency())
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<Document> {
        self.insert_at(collection, doc, self.default_consistency())
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document> {
        self.update_at(collection, id, fields, self.default_consistency())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.delete_at(collection, id, self.default_consistency())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Document> {
        self.get_at(collection, id, self.default_consistency())
    }

    fn query(
        &self,
        collection: &str,
        filter: &Fields,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>> {
        self.query_at(collection, filter, limit, offset, self.default_consistency())
    }

    fn count(&self, collection: &str) -> Result<usize> {
        self.count_at(collection, self.default_consistency())
    }

    fn close(&self) -> Result<()> {
        DatabaseRouter::close(self)
    }
}
