//! Distributed mutual-exclusion lock
//!
//! A `DistributedLock` is held while an ephemeral node exists at its lock
//! path. Acquisition is a create-if-absent race: the one create that succeeds
//! owns the lock and every loser waits for a removal notification on the lock
//! node's parent before trying again. Only the create decides ownership, so a
//! duplicate or stale notification costs one extra attempt and nothing more.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use keeper_coordination::{ChildEvent, CoordinationClient, CoordinationError, CreateMode};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::model::{LockNode, LockPath, LockRequest, LockStats, LockStatsCollector};
use crate::signal::{SignalWaiter, WaitSignal, Wake};
use crate::watch::listener::ChildListener;
use crate::watch::{SubscriptionHandle, WatchDispatcher};

/// Fires the wait signal when the lock node is removed.
struct ReleaseListener {
    signal: Arc<WaitSignal>,
}

impl ChildListener for ReleaseListener {
    fn on_event(&self, _event: &ChildEvent) {
        self.signal.fire();
    }

    fn on_closed(&self) {
        self.signal.close();
    }
}

/// The parent watch held for the lifetime of a lock instance.
struct ReleaseWatch {
    // Declared first so it is dropped before the dispatcher.
    _subscription: SubscriptionHandle,
    dispatcher: WatchDispatcher,
}

/// Why a waiting acquire resumed.
enum Resume {
    Released,
    Poll,
    Closed,
}

/// Mutual-exclusion lock shared by every process using the same lock path.
pub struct DistributedLock {
    client: Arc<dyn CoordinationClient>,
    config: LockConfig,
    request: LockRequest,
    watch: Mutex<Option<ReleaseWatch>>,
    waiter: tokio::sync::Mutex<SignalWaiter>,
    held: AtomicBool,
    stats: LockStatsCollector,
}

impl DistributedLock {
    /// Derive the lock path from `config` and run [`init`](Self::init).
    pub async fn new(client: Arc<dyn CoordinationClient>, config: LockConfig) -> Result<Self> {
        let path = LockPath::derive(&config.root_path, &config.lock_suffix)?;
        let request = LockRequest::new(config.owner.clone(), path);
        let waiter = request.signal.waiter();

        let lock = Self {
            client,
            config,
            request,
            watch: Mutex::new(None),
            waiter: tokio::sync::Mutex::new(waiter),
            held: AtomicBool::new(false),
            stats: LockStatsCollector::default(),
        };
        lock.init().await?;
        Ok(lock)
    }

    /// Ensure the namespace nodes exist and watch the lock node's parent.
    ///
    /// Safe to call repeatedly and from several processes at once.
    pub async fn init(&self) -> Result<()> {
        self.ensure_ancestors().await?;

        if self.watch.lock().is_some() {
            return Ok(());
        }

        let parent = self.request.path.parent().to_string();
        let events = self.client.watch_children(&parent).await?;

        let mut watch = self.watch.lock();
        if watch.is_none() {
            let dispatcher = WatchDispatcher::start(parent.clone(), events);
            let node = self.request.path.node().to_string();
            let subscription = dispatcher.subscribe_listener(
                move |event| event.is_removed() && event.path() == node,
                Arc::new(ReleaseListener {
                    signal: self.request.signal.clone(),
                }),
            );
            *watch = Some(ReleaseWatch {
                _subscription: subscription,
                dispatcher,
            });
            info!(
                path = %self.request.path,
                parent = %parent,
                owner = %self.request.owner,
                "Lock initialized"
            );
        }
        Ok(())
    }

    async fn ensure_ancestors(&self) -> Result<()> {
        for ancestor in self.request.path.ancestors() {
            self.ensure_persistent(&ancestor).await?;
        }
        Ok(())
    }

    async fn ensure_persistent(&self, path: &str) -> Result<()> {
        if self.client.exists(path).await?.is_some() {
            return Ok(());
        }

        match self
            .client
            .create_node(path, &[], CreateMode::Persistent, true)
            .await
        {
            Ok(_) => {
                debug!(path = %path, "Created lock namespace node");
                Ok(())
            }
            Err(err) => {
                // Whoever created it, the node existing afterwards is success.
                if self.client.exists(path).await?.is_some() {
                    debug!(path = %path, error = %err, "Namespace node created concurrently");
                    Ok(())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Block until this instance holds the lock.
    pub async fn acquire(&self) -> Result<()> {
        self.acquire_inner(None, std::future::pending()).await
    }

    /// As [`acquire`](Self::acquire), giving up with `LockError::Timeout`
    /// once `timeout` has passed. A timeout too large to represent as a
    /// deadline waits indefinitely.
    pub async fn try_acquire(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        self.acquire_inner(deadline, std::future::pending()).await
    }

    /// As [`acquire`](Self::acquire), giving up with `LockError::Cancelled`
    /// when `cancel` completes first.
    pub async fn acquire_until<F>(&self, cancel: F) -> Result<()>
    where
        F: Future,
    {
        self.acquire_inner(None, async move {
            cancel.await;
        })
        .await
    }

    async fn acquire_inner<C>(&self, deadline: Option<Instant>, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        let node = self.request.path.node();
        let owner = self.request.owner.as_str();
        let mut waiter = self.waiter.lock().await;
        if self.held.load(Ordering::SeqCst) {
            return Err(LockError::AlreadyHeld(node.to_string()));
        }

        tokio::pin!(cancel);
        let poll_interval = self.config.poll_interval();

        loop {
            // Re-arm before the create so a removal racing it still wakes us.
            waiter.arm();

            let created = self
                .client
                .create_node(node, owner.as_bytes(), CreateMode::Ephemeral, true)
                .await;

            match created {
                Ok(_) => {
                    self.held.store(true, Ordering::SeqCst);
                    self.stats.record_acquisition();
                    info!(
                        path = %node,
                        owner,
                        session_id = self.client.session_id(),
                        "Lock acquired"
                    );
                    return Ok(());
                }
                Err(CoordinationError::NodeExists(_)) => {
                    self.stats.record_contended();
                    debug!(path = %node, owner, "Lock busy, waiting for release");

                    let resume = tokio::select! {
                        resume = wait_for_release(&mut waiter, poll_interval) => resume,
                        _ = &mut cancel => {
                            info!(path = %node, owner, "Lock acquisition cancelled");
                            return Err(LockError::Cancelled(node.to_string()));
                        }
                        _ = sleep_until(deadline) => {
                            debug!(path = %node, owner, "Lock acquisition timed out");
                            return Err(LockError::Timeout(node.to_string()));
                        }
                    };

                    match resume {
                        Resume::Released => {
                            self.stats.record_wakeup();
                            debug!(path = %node, owner, "Woken by release");
                        }
                        Resume::Poll => {
                            self.stats.record_wakeup();
                            debug!(path = %node, owner, "Poll interval elapsed, retrying");
                        }
                        Resume::Closed => {
                            warn!(path = %node, owner, "Watch stream closed while waiting");
                            return Err(LockError::CoordinationUnavailable(format!(
                                "watch on {} closed",
                                self.request.path.parent()
                            )));
                        }
                    }
                }
                Err(CoordinationError::NoNode(missing)) => {
                    warn!(path = %node, missing = %missing, "Lock parent vanished, recreating");
                    self.ensure_ancestors().await?;
                }
                Err(err) => {
                    warn!(path = %node, owner, error = %err, "Lock acquisition failed");
                    return Err(err.into());
                }
            }
        }
    }

    /// Give up the lock.
    ///
    /// Returns `false` if the coordination service could not be reached; the
    /// instance then still counts as holding so the caller may retry. A node
    /// owned by another session is never deleted.
    pub async fn release(&self) -> bool {
        let node = self.request.path.node();
        match self.delete_if_owned(node).await {
            Ok(()) => {
                self.held.store(false, Ordering::SeqCst);
                true
            }
            Err(err) => {
                self.stats.record_release_failure();
                error!(
                    path = %node,
                    owner = %self.request.owner,
                    error = %err,
                    "Failed to release lock"
                );
                false
            }
        }
    }

    async fn delete_if_owned(&self, node: &str) -> std::result::Result<(), CoordinationError> {
        let Some(stat) = self.client.exists(node).await? else {
            debug!(path = %node, "Lock node absent, nothing to release");
            return Ok(());
        };

        let session_id = self.client.session_id();
        if stat.ephemeral_owner != session_id {
            warn!(
                path = %node,
                holder_session = stat.ephemeral_owner,
                session_id,
                "Lock node belongs to another session, leaving it"
            );
            return Ok(());
        }

        match self.client.delete_node(node).await {
            Ok(()) | Err(CoordinationError::NoNode(_)) => {
                self.stats.record_release();
                info!(path = %node, owner = %self.request.owner, session_id, "Lock released");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Current holder of the lock, `None` when it is free.
    pub async fn holder(&self) -> Result<Option<LockNode>> {
        let node = self.request.path.node();
        Ok(self
            .client
            .get_data(node)
            .await?
            .map(|(data, stat)| LockNode::from_node(node, &data, &stat)))
    }

    /// Release if held, then stop watching.
    ///
    /// Returns the outcome of the release (`true` when nothing was held).
    pub async fn close(self) -> bool {
        let released = if self.is_held() {
            self.release().await
        } else {
            true
        };
        if let Some(watch) = self.watch.lock().take() {
            debug!(path = %watch.dispatcher.path(), "Lock watch removed");
        }
        released
    }

    /// Whether this instance believes it holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &LockPath {
        &self.request.path
    }

    pub fn owner(&self) -> &str {
        &self.request.owner
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.is_held() {
            warn!(
                path = %self.request.path,
                owner = %self.request.owner,
                "Lock dropped while held; the node stays until its session ends"
            );
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("path", &self.request.path.node())
            .field("owner", &self.request.owner)
            .field("held", &self.is_held())
            .finish()
    }
}

async fn wait_for_release(waiter: &mut SignalWaiter, poll_interval: Option<Duration>) -> Resume {
    let wake = match poll_interval {
        Some(interval) => match tokio::time::timeout(interval, waiter.wait()).await {
            Ok(wake) => wake,
            Err(_) => return Resume::Poll,
        },
        None => waiter.wait().await,
    };
    match wake {
        Wake::Fired => Resume::Released,
        Wake::Closed => Resume::Closed,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keeper_coordination::{ChildEventStream, MemoryEnsemble, MemorySession, Stat};

    /// Delegates to a real session but answers namespace node lookups as
    /// absent and fails their creation with `create_error`, as if another
    /// client had raced the check or the connection had dropped mid-call.
    struct RacingClient {
        inner: MemorySession,
        namespace: String,
        create_error: CoordinationError,
        stale_lookups: parking_lot::Mutex<usize>,
    }

    #[async_trait]
    impl CoordinationClient for RacingClient {
        fn session_id(&self) -> i64 {
            self.inner.session_id()
        }

        async fn create_node(
            &self,
            path: &str,
            data: &[u8],
            mode: CreateMode,
            fail_if_exists: bool,
        ) -> keeper_coordination::error::Result<String> {
            if path == self.namespace {
                return Err(self.create_error.clone());
            }
            self.inner.create_node(path, data, mode, fail_if_exists).await
        }

        async fn delete_node(&self, path: &str) -> keeper_coordination::error::Result<()> {
            self.inner.delete_node(path).await
        }

        async fn exists(&self, path: &str) -> keeper_coordination::error::Result<Option<Stat>> {
            if path == self.namespace {
                let mut stale = self.stale_lookups.lock();
                if *stale > 0 {
                    *stale -= 1;
                    return Ok(None);
                }
            }
            self.inner.exists(path).await
        }

        async fn get_data(
            &self,
            path: &str,
        ) -> keeper_coordination::error::Result<Option<(Vec<u8>, Stat)>> {
            self.inner.get_data(path).await
        }

        async fn children(&self, path: &str) -> keeper_coordination::error::Result<Vec<String>> {
            self.inner.children(path).await
        }

        async fn watch_children(
            &self,
            path: &str,
        ) -> keeper_coordination::error::Result<ChildEventStream> {
            self.inner.watch_children(path).await
        }
    }

    async fn new_lock(ensemble: &MemoryEnsemble, owner: &str) -> DistributedLock {
        let client: Arc<dyn CoordinationClient> = Arc::new(ensemble.connect());
        let config = LockConfig::new("demo")
            .with_owner(owner)
            .with_poll_interval(None);
        DistributedLock::new(client, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let ensemble = MemoryEnsemble::new();
        let lock = new_lock(&ensemble, "C0").await;

        lock.init().await.unwrap();
        lock.init().await.unwrap();

        assert_eq!(ensemble.watcher_count("/customize-locks"), 1);
        assert_eq!(ensemble.child_names("/"), vec!["customize-locks"]);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let ensemble = MemoryEnsemble::new();
        let lock = new_lock(&ensemble, "C0").await;

        lock.acquire().await.unwrap();
        assert!(lock.is_held());
        let stat = ensemble.stat("/customize-locks/demo").unwrap();
        assert!(stat.is_ephemeral());

        let holder = lock.holder().await.unwrap().unwrap();
        assert_eq!(holder.owner, "C0");
        assert_eq!(holder.session_id, stat.ephemeral_owner);

        assert!(lock.release().await);
        assert!(!lock.is_held());
        assert!(ensemble.stat("/customize-locks/demo").is_none());
        assert_eq!(lock.holder().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_acquire_twice_is_rejected() {
        let ensemble = MemoryEnsemble::new();
        let lock = new_lock(&ensemble, "C0").await;

        lock.acquire().await.unwrap();
        let err = lock.acquire().await.unwrap_err();
        assert_eq!(
            err,
            LockError::AlreadyHeld("/customize-locks/demo".to_string())
        );
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_close_releases_and_unwatches() {
        let ensemble = MemoryEnsemble::new();
        let lock = new_lock(&ensemble, "C0").await;
        lock.acquire().await.unwrap();

        assert!(lock.close().await);
        assert!(ensemble.stat("/customize-locks/demo").is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ensemble.watcher_count("/customize-locks"), 0);
    }

    #[tokio::test]
    async fn test_try_acquire_with_unbounded_timeout() {
        let ensemble = MemoryEnsemble::new();
        let lock = new_lock(&ensemble, "C0").await;

        lock.try_acquire(Duration::MAX).await.unwrap();
        assert!(lock.is_held());
        assert!(lock.release().await);
    }

    // ============== Namespace Creation Tests ==============

    #[tokio::test]
    async fn test_namespace_created_by_someone_else_is_success() {
        let ensemble = MemoryEnsemble::new();
        let other = ensemble.connect();
        other
            .create_node("/customize-locks", b"", CreateMode::Persistent, true)
            .await
            .unwrap();

        let client = Arc::new(RacingClient {
            inner: ensemble.connect(),
            namespace: "/customize-locks".to_string(),
            create_error: CoordinationError::NodeExists("/customize-locks".to_string()),
            stale_lookups: parking_lot::Mutex::new(1),
        });
        let lock = DistributedLock::new(client.clone(), LockConfig::new("demo"))
            .await
            .unwrap();

        // The first lookup missed the node; the re-check after the failed
        // create found it.
        assert_eq!(*client.stale_lookups.lock(), 0);
        lock.acquire().await.unwrap();
        assert!(ensemble.stat("/customize-locks/demo").is_some());
        assert!(lock.release().await);
    }

    #[tokio::test]
    async fn test_namespace_still_absent_after_failed_create() {
        let ensemble = MemoryEnsemble::new();
        let client = Arc::new(RacingClient {
            inner: ensemble.connect(),
            namespace: "/customize-locks".to_string(),
            create_error: CoordinationError::ConnectionLoss,
            stale_lookups: parking_lot::Mutex::new(0),
        });

        let err = DistributedLock::new(client, LockConfig::new("demo"))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::CoordinationUnavailable(_)));
        assert!(ensemble.stat("/customize-locks").is_none());
    }

    #[tokio::test]
    async fn test_new_on_disconnected_session() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        ensemble.disconnect(session.session_id());
        let client: Arc<dyn CoordinationClient> = Arc::new(session);

        let err = DistributedLock::new(client, LockConfig::new("demo"))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::CoordinationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_new_with_invalid_suffix() {
        let ensemble = MemoryEnsemble::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(ensemble.connect());
        let err = DistributedLock::new(client, LockConfig::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidPath(_)));
    }
}
