//! Lock error types

/// Errors surfaced by lock handles and session coordinators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Transport or service failure. Never retried inside acquire/release.
    #[error("coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Parameters rejected locally or by the coordination service
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The session expired or was destroyed
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// Release without a confirmed hold; the lock should be treated as lost
    #[error("lock '{0}' is not held")]
    LockNotHeld(String),

    /// Acquire on a handle that already holds its lock
    #[error("lock '{0}' is already held by this handle")]
    AlreadyHeld(String),

    /// The key exists but was not written as a lock entry
    #[error("key '{0}' exists and is not a lock entry")]
    LockConflict(String),

    #[error("lock handle has been destroyed")]
    HandleDestroyed,
}

impl LockError {
    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::CoordinationUnavailable(_) | LockError::LockNotHeld(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
