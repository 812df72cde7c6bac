//! Coordination-service client contract

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{ChildEvent, CreateMode, Stat};

/// Stream of child notifications for one watched parent.
///
/// Events arrive at least once per actual change, with no ordering guarantee
/// across different children. The stream ends when the owning session ends.
pub type ChildEventStream = mpsc::UnboundedReceiver<ChildEvent>;

/// Client for a hierarchical-namespace coordination service.
///
/// Every call is made on behalf of one session. Ephemeral nodes created
/// through a client disappear when its session ends.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Id of the session this client speaks for.
    fn session_id(&self) -> i64;

    /// Create a node and return its path.
    ///
    /// With `fail_if_exists` an existing node yields `NodeExists`; without it
    /// the existing node is left untouched and its path returned.
    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        fail_if_exists: bool,
    ) -> Result<String>;

    /// Delete a node. Fails with `NoNode` if absent and `NotEmpty` if it has
    /// children.
    async fn delete_node(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    async fn get_data(&self, path: &str) -> Result<Option<(Vec<u8>, Stat)>>;

    /// Child names (not full paths), sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Subscribe to child add/remove notifications under `path`.
    async fn watch_children(&self, path: &str) -> Result<ChildEventStream>;
}
