//! Consistency levels
//!
//! A consistency level is chosen per call and trades latency for durability.
//! It is a strategy selector, not a process state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-call consistency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// This node's storage engine only
    #[default]
    Local,
    /// Local write, asynchronous replication
    Eventual,
    /// Acknowledged by a quorum of replicas
    Quorum,
    /// Committed through the consensus log
    Strong,
}

impl ConsistencyLevel {
    /// All levels, weakest first
    pub const ALL: [ConsistencyLevel; 4] = [
        ConsistencyLevel::Local,
        ConsistencyLevel::Eventual,
        ConsistencyLevel::Quorum,
        ConsistencyLevel::Strong,
    ];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Local => "local",
            ConsistencyLevel::Eventual => "eventual",
            ConsistencyLevel::Quorum => "quorum",
            ConsistencyLevel::Strong => "strong",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ConsistencyLevel::Local),
            "eventual" => Ok(ConsistencyLevel::Eventual),
            "quorum" => Ok(ConsistencyLevel::Quorum),
            "strong" => Ok(ConsistencyLevel::Strong),
            other => Err(format!("unknown consistency level '{}'", other)),
        }
    }
}
