//! Session handle onto a `MemoryEnsemble`

use std::sync::Arc;

use async_trait::async_trait;

use super::{EnsembleState, SessionStatus};
use crate::client::{ChildEventStream, CoordinationClient};
use crate::error::Result;
use crate::model::{CreateMode, Stat};

/// One client session. Dropping it closes the session, which removes its
/// ephemeral nodes.
pub struct MemorySession {
    state: Arc<EnsembleState>,
    session_id: i64,
}

impl MemorySession {
    pub(crate) fn new(state: Arc<EnsembleState>, session_id: i64) -> Self {
        Self { state, session_id }
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.state.end_session(self.session_id, SessionStatus::Expired);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("session_id", &format_args!("{:#x}", self.session_id))
            .finish()
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    fn session_id(&self) -> i64 {
        self.session_id
    }

    async fn create_node(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        fail_if_exists: bool,
    ) -> Result<String> {
        self.state
            .create(self.session_id, path, data, mode, fail_if_exists)
    }

    async fn delete_node(&self, path: &str) -> Result<()> {
        self.state.delete(self.session_id, path)
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.state.exists(self.session_id, path)
    }

    async fn get_data(&self, path: &str) -> Result<Option<(Vec<u8>, Stat)>> {
        self.state.get_data(self.session_id, path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.state.children(self.session_id, path)
    }

    async fn watch_children(&self, path: &str) -> Result<ChildEventStream> {
        self.state.watch_children(self.session_id, path)
    }
}
