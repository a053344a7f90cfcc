//! Replication collaborators consumed by the router
//!
//! Consensus, quorum and asynchronous replication are implemented outside
//! this crate. Each collaborator is itself a [`LocalDatabase`] (its own view
//! of the data) plus the protocol entry points the router drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use velocity_core::{Document, Fields, LocalDatabase, Result};

/// Kind of replicated write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Insert of `Operation::document`
    Insert,
    /// Field merge of `Operation::fields` into `Operation::id`
    Update,
    /// Removal of `Operation::id`
    Delete,
}

/// A write shipped to a consensus log or replication queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Write kind
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target collection
    pub collection: String,
    /// Full document (inserts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    /// Target id (updates and deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Fields to merge (updates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    /// When the originating node issued the write
    pub timestamp: DateTime<Utc>,
    /// Originating node
    pub node_id: String,
}

impl Operation {
    /// Insert of a fully stamped document
    pub fn insert(collection: &str, document: Document, node_id: &str) -> Self {
        Self {
            id: Some(document.id.clone()),
            document: Some(document),
            ..Self::bare(OperationType::Insert, collection, node_id)
        }
    }

    /// Field merge into `id`
    pub fn update(collection: &str, id: &str, fields: Fields, node_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            fields: Some(fields),
            ..Self::bare(OperationType::Update, collection, node_id)
        }
    }

    /// Removal of `id`
    pub fn delete(collection: &str, id: &str, node_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::bare(OperationType::Delete, collection, node_id)
        }
    }

    fn bare(op_type: OperationType, collection: &str, node_id: &str) -> Self {
        Self {
            op_type,
            collection: collection.to_string(),
            document: None,
            id: None,
            fields: None,
            timestamp: Utc::now(),
            node_id: node_id.to_string(),
        }
    }

    /// Document id this operation targets
    pub fn target_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Progress of asynchronous replication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    /// Operations not yet acknowledged by peers
    pub pending_ops: usize,
    /// Last successful sync with peers
    pub last_sync: DateTime<Utc>,
    /// Age of the oldest pending operation
    pub replication_lag: Duration,
}

/// Consensus-backed store serving the Strong level
pub trait RaftDatabase: LocalDatabase {
    /// Append `op` to the consensus log; returns its log index
    fn propose_operation(&self, op: &Operation) -> Result<u64>;

    /// Whether this node currently leads the consensus group
    fn is_leader(&self) -> bool;

    /// Block until the entry at `index` is applied locally, or `timeout`
    fn wait_for_apply(&self, index: u64, timeout: Duration) -> Result<()>;
}

/// Quorum-replicated store serving the Quorum level
pub trait QuorumDatabase: LocalDatabase {
    /// Read `id` from at least `quorum_size` replicas
    fn quorum_read(&self, collection: &str, id: &str, quorum_size: usize) -> Result<Document>;

    /// Write `doc` to at least `quorum_size` replicas
    fn quorum_write(&self, collection: &str, doc: &Document, quorum_size: usize) -> Result<()>;
}

/// Asynchronous replication queue serving the Eventual level
pub trait EventualDatabase: LocalDatabase {
    /// Enqueue `op` for delivery to peers
    fn async_replicate(&self, op: &Operation) -> Result<()>;

    /// Current replication backlog
    fn replication_status(&self) -> Result<ReplicationStatus>;
}
