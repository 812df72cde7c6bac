//! Node and notification model shared by all coordination clients

use serde::{Deserialize, Serialize};

/// How long a node lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Survives the creating session; removed only by an explicit delete.
    #[default]
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral)
    }
}

/// Node metadata, modelled on the ZooKeeper `Stat` structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    /// Transaction id that created the node
    pub czxid: i64,
    /// Transaction id that last modified the node
    pub mzxid: i64,
    /// Creation time (unix millis)
    pub ctime: i64,
    /// Last modification time (unix millis)
    pub mtime: i64,
    /// Data version
    pub version: i32,
    /// Child-list version, bumped on every child add/remove
    pub cversion: i32,
    /// Owning session for ephemeral nodes, 0 for persistent ones
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
}

impl Stat {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// Child-set change under a watched parent. Carries the full child path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildEvent {
    Added(String),
    Removed(String),
}

impl ChildEvent {
    pub fn path(&self) -> &str {
        match self {
            ChildEvent::Added(path) | ChildEvent::Removed(path) => path,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, ChildEvent::Removed(_))
    }
}

impl std::fmt::Display for ChildEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildEvent::Added(path) => write!(f, "CHILD_ADDED {}", path),
            ChildEvent::Removed(path) => write!(f, "CHILD_REMOVED {}", path),
        }
    }
}
