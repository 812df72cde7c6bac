//! Error types returned by coordination-service clients

/// Error type for coordination-service operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no node: {0}")]
    NoNode(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("ephemeral nodes may not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("connection lost")]
    ConnectionLoss,

    #[error("session {0:#x} expired")]
    SessionExpired(i64),
}

impl CoordinationError {
    /// Whether the error means the session can no longer be used, as opposed
    /// to a normal outcome of the requested operation.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss | CoordinationError::SessionExpired(_)
        )
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        CoordinationError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinationError::NodeExists("/locks/a".to_string());
        assert_eq!(err.to_string(), "node already exists: /locks/a");

        let err = CoordinationError::SessionExpired(0x1f);
        assert_eq!(err.to_string(), "session 0x1f expired");

        let err = CoordinationError::invalid_path("locks", "path must start with '/'");
        assert_eq!(
            err.to_string(),
            "invalid path 'locks': path must start with '/'"
        );
    }

    #[test]
    fn test_is_unavailable() {
        assert!(CoordinationError::ConnectionLoss.is_unavailable());
        assert!(CoordinationError::SessionExpired(1).is_unavailable());
        assert!(!CoordinationError::NodeExists("/a".to_string()).is_unavailable());
        assert!(!CoordinationError::NoNode("/a".to_string()).is_unavailable());
    }
}
