//! In-process coordination ensemble
//!
//! `MemoryEnsemble` keeps a node tree shared by any number of sessions and
//! honours the coordination contract: create-if-absent, ephemeral nodes bound
//! to their session, and child notifications fanned out to every watcher of a
//! parent. Sessions can be disconnected, reconnected or expired to exercise
//! failure handling in callers.

mod session;

pub use session::MemorySession;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::ChildEventStream;
use crate::error::{CoordinationError, Result};
use crate::model::{ChildEvent, CreateMode, Stat};
use crate::path;

/// Session ids start here so that 0 stays free to mean "persistent".
const FIRST_SESSION_ID: i64 = 0x1000;

/// Connection state of a session as seen by the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    /// Calls fail with `ConnectionLoss`; ephemeral nodes and watches survive.
    Disconnected,
    /// Terminal. Ephemeral nodes are gone and watch streams have ended.
    Expired,
}

struct ZNode {
    data: Vec<u8>,
    stat: Stat,
}

struct Watcher {
    session_id: i64,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

pub(crate) struct EnsembleState {
    tree: RwLock<BTreeMap<String, ZNode>>,
    watchers: DashMap<String, Vec<Watcher>>,
    sessions: DashMap<i64, SessionStatus>,
    next_session_id: AtomicI64,
    zxid: AtomicI64,
}

/// Shared handle to an in-process ensemble. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryEnsemble {
    state: Arc<EnsembleState>,
}

impl MemoryEnsemble {
    /// Create an ensemble holding only the root node.
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(
            path::ROOT.to_string(),
            ZNode {
                data: Vec::new(),
                stat: Stat::default(),
            },
        );

        Self {
            state: Arc::new(EnsembleState {
                tree: RwLock::new(tree),
                watchers: DashMap::new(),
                sessions: DashMap::new(),
                next_session_id: AtomicI64::new(FIRST_SESSION_ID),
                zxid: AtomicI64::new(0),
            }),
        }
    }

    /// Open a new session.
    pub fn connect(&self) -> MemorySession {
        let session_id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.state
            .sessions
            .insert(session_id, SessionStatus::Connected);
        info!(session_id, "Session established");
        MemorySession::new(self.state.clone(), session_id)
    }

    /// Simulate a dropped connection: calls fail until `reconnect`.
    pub fn disconnect(&self, session_id: i64) {
        if let Some(mut status) = self.state.sessions.get_mut(&session_id)
            && *status == SessionStatus::Connected
        {
            *status = SessionStatus::Disconnected;
            info!(session_id, "Session disconnected");
        }
    }

    pub fn reconnect(&self, session_id: i64) {
        if let Some(mut status) = self.state.sessions.get_mut(&session_id)
            && *status == SessionStatus::Disconnected
        {
            *status = SessionStatus::Connected;
            info!(session_id, "Session reconnected");
        }
    }

    /// Expire a session as the service would after a missed timeout.
    pub fn expire_session(&self, session_id: i64) {
        self.state.end_session(session_id, SessionStatus::Expired);
    }

    /// Deliver `event` again to every watcher of `parent`, whether or not the
    /// tree changed. Models duplicate or stale at-least-once delivery.
    pub fn replay_child_event(&self, parent: &str, event: ChildEvent) {
        self.state.notify(parent, event);
    }

    pub fn session_status(&self, session_id: i64) -> Option<SessionStatus> {
        self.state.sessions.get(&session_id).map(|s| *s)
    }

    /// Sessions that have not ended.
    pub fn session_count(&self) -> usize {
        self.state
            .sessions
            .iter()
            .filter(|entry| *entry.value() != SessionStatus::Expired)
            .count()
    }

    /// Stat of a node, read outside of any session.
    pub fn stat(&self, path: &str) -> Option<Stat> {
        self.state.tree.read().get(path).map(|node| node.stat.clone())
    }

    /// Child names of a node, read outside of any session.
    pub fn child_names(&self, path: &str) -> Vec<String> {
        self.state.child_names(path)
    }

    /// Number of live watch registrations on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        self.state
            .watchers
            .get(path)
            .map(|list| list.iter().filter(|w| !w.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl EnsembleState {
    fn check_session(&self, session_id: i64) -> Result<()> {
        match self.sessions.get(&session_id).map(|s| *s) {
            Some(SessionStatus::Connected) => Ok(()),
            Some(SessionStatus::Disconnected) => Err(CoordinationError::ConnectionLoss),
            Some(SessionStatus::Expired) | None => {
                Err(CoordinationError::SessionExpired(session_id))
            }
        }
    }

    fn next_zxid(&self) -> i64 {
        self.zxid.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn create(
        &self,
        session_id: i64,
        node_path: &str,
        data: &[u8],
        mode: CreateMode,
        fail_if_exists: bool,
    ) -> Result<String> {
        path::validate(node_path)?;

        {
            // Checked under the write lock so `end_session` cannot sweep the
            // session's ephemeral nodes between the check and the insert.
            let mut tree = self.tree.write();
            self.check_session(session_id)?;
            if tree.contains_key(node_path) {
                return if fail_if_exists {
                    Err(CoordinationError::NodeExists(node_path.to_string()))
                } else {
                    Ok(node_path.to_string())
                };
            }

            // The root always exists, so any path reaching here has a parent.
            let parent_path = path::parent(node_path).unwrap_or(path::ROOT);
            let parent = tree
                .get_mut(parent_path)
                .ok_or_else(|| CoordinationError::NoNode(parent_path.to_string()))?;
            if parent.stat.is_ephemeral() {
                return Err(CoordinationError::NoChildrenForEphemerals(
                    parent_path.to_string(),
                ));
            }
            parent.stat.cversion += 1;
            parent.stat.num_children += 1;

            let zxid = self.next_zxid();
            let now = chrono::Utc::now().timestamp_millis();
            let ephemeral_owner = if mode.is_ephemeral() { session_id } else { 0 };
            tree.insert(
                node_path.to_string(),
                ZNode {
                    data: data.to_vec(),
                    stat: Stat {
                        czxid: zxid,
                        mzxid: zxid,
                        ctime: now,
                        mtime: now,
                        version: 0,
                        cversion: 0,
                        ephemeral_owner,
                        data_length: data.len() as i32,
                        num_children: 0,
                    },
                },
            );
        }

        debug!(path = %node_path, ?mode, "Node created");
        if let Some(parent_path) = path::parent(node_path) {
            self.notify(parent_path, ChildEvent::Added(node_path.to_string()));
        }
        Ok(node_path.to_string())
    }

    pub(crate) fn delete(&self, session_id: i64, node_path: &str) -> Result<()> {
        self.check_session(session_id)?;
        path::validate(node_path)?;
        if node_path == path::ROOT {
            return Err(CoordinationError::invalid_path(
                node_path,
                "the root node cannot be deleted",
            ));
        }

        {
            let mut tree = self.tree.write();
            let node = tree
                .get(node_path)
                .ok_or_else(|| CoordinationError::NoNode(node_path.to_string()))?;
            if node.stat.num_children > 0 {
                return Err(CoordinationError::NotEmpty(node_path.to_string()));
            }
            Self::remove_locked(&mut tree, node_path);
        }

        debug!(path = %node_path, "Node deleted");
        if let Some(parent_path) = path::parent(node_path) {
            self.notify(parent_path, ChildEvent::Removed(node_path.to_string()));
        }
        Ok(())
    }

    fn remove_locked(tree: &mut BTreeMap<String, ZNode>, node_path: &str) {
        tree.remove(node_path);
        if let Some(parent_path) = path::parent(node_path)
            && let Some(parent) = tree.get_mut(parent_path)
        {
            parent.stat.cversion += 1;
            parent.stat.num_children -= 1;
        }
    }

    pub(crate) fn exists(&self, session_id: i64, node_path: &str) -> Result<Option<Stat>> {
        self.check_session(session_id)?;
        path::validate(node_path)?;
        Ok(self.tree.read().get(node_path).map(|node| node.stat.clone()))
    }

    pub(crate) fn get_data(
        &self,
        session_id: i64,
        node_path: &str,
    ) -> Result<Option<(Vec<u8>, Stat)>> {
        self.check_session(session_id)?;
        path::validate(node_path)?;
        Ok(self
            .tree
            .read()
            .get(node_path)
            .map(|node| (node.data.clone(), node.stat.clone())))
    }

    pub(crate) fn children(&self, session_id: i64, node_path: &str) -> Result<Vec<String>> {
        self.check_session(session_id)?;
        path::validate(node_path)?;
        if !self.tree.read().contains_key(node_path) {
            return Err(CoordinationError::NoNode(node_path.to_string()));
        }
        Ok(self.child_names(node_path))
    }

    fn child_names(&self, node_path: &str) -> Vec<String> {
        let tree = self.tree.read();
        let prefix = if node_path == path::ROOT {
            path::ROOT.to_string()
        } else {
            format!("{}/", node_path)
        };
        tree.range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, _)| path::name(key).to_string())
            .collect()
    }

    pub(crate) fn watch_children(
        &self,
        session_id: i64,
        node_path: &str,
    ) -> Result<ChildEventStream> {
        path::validate(node_path)?;

        let tree = self.tree.read();
        self.check_session(session_id)?;
        if !tree.contains_key(node_path) {
            return Err(CoordinationError::NoNode(node_path.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .entry(node_path.to_string())
            .or_default()
            .push(Watcher { session_id, tx });
        drop(tree);
        debug!(path = %node_path, session_id, "Child watch registered");
        Ok(rx)
    }

    fn notify(&self, parent_path: &str, event: ChildEvent) {
        if let Some(mut list) = self.watchers.get_mut(parent_path) {
            list.retain(|watcher| watcher.tx.send(event.clone()).is_ok());
        }
    }

    /// End a session: its watch streams close, then its ephemeral nodes are
    /// removed and the removals announced to the remaining watchers.
    ///
    /// The whole transition happens under the tree write lock, which `create`
    /// and `watch_children` hold while checking the session.
    pub(crate) fn end_session(&self, session_id: i64, status: SessionStatus) {
        let removed: Vec<String> = {
            let mut tree = self.tree.write();
            match self.sessions.get_mut(&session_id) {
                Some(mut current) if *current != SessionStatus::Expired => *current = status,
                _ => return,
            }

            for mut entry in self.watchers.iter_mut() {
                entry
                    .value_mut()
                    .retain(|watcher| watcher.session_id != session_id);
            }

            let owned: Vec<String> = tree
                .iter()
                .filter(|(_, node)| node.stat.ephemeral_owner == session_id)
                .map(|(key, _)| key.clone())
                .collect();
            for node_path in &owned {
                Self::remove_locked(&mut tree, node_path);
            }
            owned
        };

        info!(
            session_id,
            ephemeral_nodes = removed.len(),
            "Session ended"
        );

        for node_path in removed {
            if let Some(parent_path) = path::parent(&node_path) {
                self.notify(parent_path, ChildEvent::Removed(node_path.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CoordinationClient;

    #[tokio::test]
    async fn test_create_exists_delete() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        session
            .create_node("/locks", b"", CreateMode::Persistent, true)
            .await
            .unwrap();
        let stat = session.exists("/locks").await.unwrap().unwrap();
        assert!(!stat.is_ephemeral());

        session.delete_node("/locks").await.unwrap();
        assert!(session.exists("/locks").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        session
            .create_node("/locks", b"first", CreateMode::Persistent, true)
            .await
            .unwrap();

        let err = session
            .create_node("/locks", b"second", CreateMode::Persistent, true)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinationError::NodeExists("/locks".to_string()));

        // Without fail_if_exists the existing node is kept as is
        session
            .create_node("/locks", b"second", CreateMode::Persistent, false)
            .await
            .unwrap();
        let (data, _) = session.get_data("/locks").await.unwrap().unwrap();
        assert_eq!(data, b"first");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        let err = session
            .create_node("/a/b", b"", CreateMode::Persistent, true)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinationError::NoNode("/a".to_string()));
    }

    #[tokio::test]
    async fn test_ephemeral_cannot_have_children() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        session
            .create_node("/e", b"", CreateMode::Ephemeral, true)
            .await
            .unwrap();
        let err = session
            .create_node("/e/child", b"", CreateMode::Persistent, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NoChildrenForEphemerals(_)));
    }

    #[tokio::test]
    async fn test_delete_errors() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        assert!(matches!(
            session.delete_node("/missing").await,
            Err(CoordinationError::NoNode(_))
        ));

        session
            .create_node("/a", b"", CreateMode::Persistent, true)
            .await
            .unwrap();
        session
            .create_node("/a/b", b"", CreateMode::Persistent, true)
            .await
            .unwrap();
        assert!(matches!(
            session.delete_node("/a").await,
            Err(CoordinationError::NotEmpty(_))
        ));
        assert!(matches!(
            session.delete_node("/").await,
            Err(CoordinationError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_children_and_parent_stat() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        session
            .create_node("/locks", b"", CreateMode::Persistent, true)
            .await
            .unwrap();
        for name in ["b", "a", "c"] {
            session
                .create_node(&format!("/locks/{}", name), b"", CreateMode::Persistent, true)
                .await
                .unwrap();
        }
        session
            .create_node("/locks/a/nested", b"", CreateMode::Persistent, true)
            .await
            .unwrap();

        assert_eq!(session.children("/locks").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(session.children("/").await.unwrap(), vec!["locks"]);

        let stat = ensemble.stat("/locks").unwrap();
        assert_eq!(stat.num_children, 3);
        assert_eq!(stat.cversion, 3);
    }

    #[tokio::test]
    async fn test_watch_children_events() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session
            .create_node("/locks", b"", CreateMode::Persistent, true)
            .await
            .unwrap();

        let mut events = session.watch_children("/locks").await.unwrap();

        session
            .create_node("/locks/a", b"", CreateMode::Ephemeral, true)
            .await
            .unwrap();
        session.delete_node("/locks/a").await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(ChildEvent::Added("/locks/a".to_string()))
        );
        assert_eq!(
            events.recv().await,
            Some(ChildEvent::Removed("/locks/a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_watch_requires_node() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        assert!(matches!(
            session.watch_children("/missing").await,
            Err(CoordinationError::NoNode(_))
        ));
    }

    #[tokio::test]
    async fn test_expire_removes_ephemerals_and_notifies() {
        let ensemble = MemoryEnsemble::new();
        let watcher = ensemble.connect();
        let holder = ensemble.connect();

        watcher
            .create_node("/locks", b"", CreateMode::Persistent, true)
            .await
            .unwrap();
        let mut events = watcher.watch_children("/locks").await.unwrap();
        let mut holder_events = holder.watch_children("/locks").await.unwrap();

        holder
            .create_node("/locks/a", b"", CreateMode::Ephemeral, true)
            .await
            .unwrap();
        ensemble.expire_session(holder.session_id());

        assert_eq!(
            events.recv().await,
            Some(ChildEvent::Added("/locks/a".to_string()))
        );
        assert_eq!(
            events.recv().await,
            Some(ChildEvent::Removed("/locks/a".to_string()))
        );
        assert!(ensemble.stat("/locks/a").is_none());
        assert!(ensemble.stat("/locks").is_some());

        // The expired session's own stream ends after what was already queued
        assert_eq!(
            holder_events.recv().await,
            Some(ChildEvent::Added("/locks/a".to_string()))
        );
        assert_eq!(holder_events.recv().await, None);

        assert_eq!(
            holder.exists("/locks").await,
            Err(CoordinationError::SessionExpired(holder.session_id()))
        );
    }

    #[tokio::test]
    async fn test_expired_session_cannot_create_or_watch() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        ensemble.expire_session(session.session_id());

        assert_eq!(
            session
                .create_node("/e", b"", CreateMode::Ephemeral, true)
                .await,
            Err(CoordinationError::SessionExpired(session.session_id()))
        );
        assert!(ensemble.stat("/e").is_none());
        assert!(matches!(
            session.watch_children("/").await,
            Err(CoordinationError::SessionExpired(_))
        ));
        assert_eq!(ensemble.watcher_count("/"), 0);
    }

    #[test]
    fn test_expiry_racing_creates_leaves_no_orphans() {
        let ensemble = MemoryEnsemble::new();
        for round in 0..50 {
            let handles: Vec<MemorySession> = (0..4).map(|_| ensemble.connect()).collect();
            let sessions: Vec<i64> = handles.iter().map(|s| s.session_id()).collect();

            std::thread::scope(|scope| {
                for (i, &sid) in sessions.iter().enumerate() {
                    let state = ensemble.state.clone();
                    scope.spawn(move || {
                        for n in 0..20 {
                            let node = format!("/r{round}-s{i}-n{n}");
                            let _ = state.create(sid, &node, b"", CreateMode::Ephemeral, true);
                            let _ = state.watch_children(sid, "/");
                        }
                    });
                }
                for &sid in &sessions {
                    let state = ensemble.state.clone();
                    scope.spawn(move || state.end_session(sid, SessionStatus::Expired));
                }
            });

            let tree = ensemble.state.tree.read();
            for sid in &sessions {
                assert!(tree.values().all(|node| node.stat.ephemeral_owner != *sid));
            }
            drop(tree);
            let live = ensemble.state.watchers.get("/").map(|list| {
                list.iter()
                    .filter(|w| sessions.contains(&w.session_id))
                    .count()
            });
            assert_eq!(live.unwrap_or(0), 0);
        }
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session
            .create_node("/e", b"", CreateMode::Ephemeral, true)
            .await
            .unwrap();

        ensemble.disconnect(session.session_id());
        assert_eq!(
            session.exists("/e").await,
            Err(CoordinationError::ConnectionLoss)
        );
        // Ephemeral nodes survive a disconnect
        assert!(ensemble.stat("/e").is_some());

        ensemble.reconnect(session.session_id());
        assert!(session.exists("/e").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replay_child_event() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        let mut events = session.watch_children("/").await.unwrap();

        ensemble.replay_child_event("/", ChildEvent::Removed("/ghost".to_string()));
        assert_eq!(
            events.recv().await,
            Some(ChildEvent::Removed("/ghost".to_string()))
        );
        assert_eq!(ensemble.watcher_count("/"), 1);
    }

    #[test]
    fn test_session_bookkeeping() {
        let ensemble = MemoryEnsemble::new();
        let a = ensemble.connect();
        let b = ensemble.connect();
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(ensemble.session_count(), 2);

        ensemble.expire_session(a.session_id());
        assert_eq!(
            ensemble.session_status(a.session_id()),
            Some(SessionStatus::Expired)
        );
        assert_eq!(ensemble.session_count(), 1);

        drop(b);
        assert_eq!(ensemble.session_count(), 0);
    }
}
