//! Lock configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default namespace root under which lock nodes are created
pub const DEFAULT_ROOT_PATH: &str = "/customize-locks";

/// Default fallback re-check interval while waiting for a release
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Configuration for one `DistributedLock` instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockConfig {
    /// Persistent namespace root (absolute path, `/` allowed)
    pub root_path: String,
    /// Lock name relative to the root; may contain several segments
    pub lock_suffix: String,
    /// Identifier of the owning process, stored as the lock node's data
    pub owner: String,
    /// Re-attempt the create after this long without a release notification.
    /// `None` waits for notifications only.
    pub poll_interval_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_string(),
            lock_suffix: String::new(),
            owner: uuid::Uuid::new_v4().to_string(),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl LockConfig {
    /// Create a config for `lock_suffix` under the default root.
    pub fn new(lock_suffix: impl Into<String>) -> Self {
        Self {
            lock_suffix: lock_suffix.into(),
            ..Default::default()
        }
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_lock_suffix(mut self, lock_suffix: impl Into<String>) -> Self {
        self.lock_suffix = lock_suffix.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Set the fallback re-check interval. Intervals are kept in whole
    /// milliseconds: a non-zero interval below 1 ms rounds up to 1 ms, while
    /// `Duration::ZERO` disables polling like `None`.
    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval_ms = interval.map(|d| {
            let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
            if ms == 0 && !d.is_zero() { 1 } else { ms }
        });
        self
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
