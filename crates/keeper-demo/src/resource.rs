//! Shared resource that must never be used by two clients at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("resource busy: {0} found it in use by another client")]
    Busy(String),
}

/// Stand-in for something only one process may touch at a time. Overlapping
/// use is detected with a compare-and-set flag and reported as an error.
#[derive(Debug, Default)]
pub struct LimitedResource {
    in_use: AtomicBool,
    max_hold: Duration,
    uses: AtomicU64,
    conflicts: AtomicU64,
}

/// Clears the busy flag even if the use is cancelled mid-way.
struct InUse<'a>(&'a AtomicBool);

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LimitedResource {
    pub fn new(max_hold: Duration) -> Self {
        Self {
            max_hold,
            ..Default::default()
        }
    }

    /// Use the resource for a random time up to `max_hold`.
    pub async fn use_resource(&self, user: &str) -> Result<(), ResourceError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            error!(user, "Resource used concurrently");
            return Err(ResourceError::Busy(user.to_string()));
        }
        let _in_use = InUse(&self.in_use);

        let max_ms = self.max_hold.as_millis() as u64;
        let hold_ms = if max_ms > 0 {
            rand::rng().random_range(0..=max_ms)
        } else {
            0
        };
        info!(user, hold_ms, "Using resource");
        tokio::time::sleep(Duration::from_millis(hold_ms)).await;

        self.uses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }
}
