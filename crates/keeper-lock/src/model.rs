//! Lock data model

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use keeper_coordination::{Stat, path};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};
use crate::metrics;
use crate::signal::WaitSignal;

/// Derived location of a lock node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPath {
    root: String,
    node: String,
}

impl LockPath {
    /// Derive `root + "/" + suffix`, validating both parts.
    pub fn derive(root: &str, suffix: &str) -> Result<Self> {
        path::validate(root).map_err(LockError::from)?;
        let node = path::join(root, suffix).map_err(LockError::from)?;
        Ok(Self {
            root: root.to_string(),
            node,
        })
    }

    /// Namespace root
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Full path of the lock node
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Parent of the lock node; the node watched for removals.
    pub fn parent(&self) -> &str {
        path::parent(&self.node).unwrap_or(path::ROOT)
    }

    /// Persistent nodes that must exist before the lock node can be created,
    /// shallowest first.
    pub fn ancestors(&self) -> Vec<String> {
        let mut lineage = path::lineage(&self.node);
        lineage.pop();
        lineage
    }
}

impl std::fmt::Display for LockPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.node)
    }
}

/// One process's attempt to hold a lock.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub owner: String,
    pub path: LockPath,
    pub signal: Arc<WaitSignal>,
}

impl LockRequest {
    pub fn new(owner: impl Into<String>, path: LockPath) -> Self {
        Self {
            owner: owner.into(),
            path,
            signal: Arc::new(WaitSignal::new()),
        }
    }
}

/// The ephemeral node that exists while some process holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockNode {
    pub path: String,
    /// Owner identifier stored in the node
    pub owner: String,
    /// Session that created the node
    pub session_id: i64,
    /// Creation time (unix millis)
    pub acquired_at: i64,
}

impl LockNode {
    pub(crate) fn from_node(path: &str, data: &[u8], stat: &Stat) -> Self {
        Self {
            path: path.to_string(),
            owner: String::from_utf8_lossy(data).into_owned(),
            session_id: stat.ephemeral_owner,
            acquired_at: stat.ctime,
        }
    }
}

/// Counters for one lock instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    pub acquisitions: u64,
    /// Create attempts that lost to an existing node
    pub contended: u64,
    /// Times a waiting acquire was woken (notification or poll)
    pub wakeups: u64,
    pub releases: u64,
    pub release_failures: u64,
}

#[derive(Default)]
pub(crate) struct LockStatsCollector {
    acquisitions: AtomicU64,
    contended: AtomicU64,
    wakeups: AtomicU64,
    releases: AtomicU64,
    release_failures: AtomicU64,
}

impl LockStatsCollector {
    pub(crate) fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(metrics::LOCK_ACQUISITIONS_TOTAL).increment(1);
    }

    pub(crate) fn record_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(metrics::LOCK_CONTENDED_TOTAL).increment(1);
    }

    pub(crate) fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(metrics::LOCK_RELEASES_TOTAL).increment(1);
    }

    pub(crate) fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(metrics::LOCK_RELEASE_FAILURES_TOTAL).increment(1);
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }
}
