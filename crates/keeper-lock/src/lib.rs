//! Keeper Lock - distributed mutual exclusion over coordination primitives
//!
//! This crate provides:
//! - `DistributedLock`: ephemeral-node lock with notification-driven waiting
//! - Bounded (`try_acquire`) and cancellable (`acquire_until`) acquisition
//! - `WatchDispatcher`: child-event dispatch with explicit subscriptions
//! - Lock statistics and `metrics` counters

pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod signal;
pub mod watch;

pub use config::LockConfig;
pub use error::LockError;
pub use lock::DistributedLock;
pub use metrics::describe_lock_metrics;
pub use model::{LockNode, LockPath, LockRequest, LockStats};
pub use watch::listener::{ChildListener, FnChildListener};
pub use watch::{SubscriptionHandle, WatchDispatcher};
