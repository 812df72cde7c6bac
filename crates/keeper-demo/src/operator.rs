//! One client's lock-then-use loop.

use std::sync::Arc;
use std::time::Duration;

use keeper_coordination::CoordinationClient;
use keeper_lock::{DistributedLock, LockConfig, LockError};
use tracing::{error, info};

use crate::resource::LimitedResource;

/// What happened in one round of `do_lock_once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// The resource was found in use despite holding the lock
    pub conflict: bool,
    pub released: bool,
}

pub struct LockOperator {
    name: String,
    lock: DistributedLock,
    resource: Arc<LimitedResource>,
    acquire_timeout: Option<Duration>,
}

impl LockOperator {
    pub async fn new(
        name: impl Into<String>,
        client: Arc<dyn CoordinationClient>,
        config: LockConfig,
        resource: Arc<LimitedResource>,
        acquire_timeout: Option<Duration>,
    ) -> Result<Self, LockError> {
        let name = name.into();
        let lock = DistributedLock::new(client, config).await?;
        info!(client = %name, path = %lock.path(), "Lock operator ready");
        Ok(Self {
            name,
            lock,
            resource,
            acquire_timeout,
        })
    }

    /// Acquire the lock, use the resource once, release. The release runs
    /// whatever the resource reports.
    pub async fn do_lock_once(&self, round: usize) -> Result<RoundOutcome, LockError> {
        info!(client = %self.name, round, "Acquiring lock");
        match self.acquire_timeout {
            Some(timeout) => self.lock.try_acquire(timeout).await?,
            None => self.lock.acquire().await?,
        }

        let user = format!("{}#{}", self.name, round);
        let used = self.resource.use_resource(&user).await;
        if let Err(e) = &used {
            error!(client = %self.name, round, error = %e, "Resource use failed");
        }

        let released = self.lock.release().await;
        info!(client = %self.name, round, released, "Lock released");

        Ok(RoundOutcome {
            conflict: used.is_err(),
            released,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub async fn close(self) -> bool {
        self.lock.close().await
    }
}
