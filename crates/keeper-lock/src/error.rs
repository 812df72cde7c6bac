//! Lock error types

use keeper_coordination::CoordinationError;

/// Error type for distributed lock operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("invalid lock path: {0}")]
    InvalidPath(String),

    /// The session is gone or the connection dropped; retrying against the
    /// same client will not succeed.
    #[error("coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("timed out waiting for lock {0}")]
    Timeout(String),

    #[error("acquisition of lock {0} was cancelled")]
    Cancelled(String),

    #[error("lock {0} is already held by this instance")]
    AlreadyHeld(String),

    #[error("coordination error: {0}")]
    Coordination(CoordinationError),
}

impl From<CoordinationError> for LockError {
    fn from(err: CoordinationError) -> Self {
        match err {
            e if e.is_unavailable() => LockError::CoordinationUnavailable(e.to_string()),
            CoordinationError::InvalidPath { path, reason } => {
                LockError::InvalidPath(format!("{}: {}", path, reason))
            }
            e => LockError::Coordination(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
