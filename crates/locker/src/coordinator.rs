//! Coordination service capability used by lock handles

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{LockConfig, SessionBehavior};
use crate::error::Result;

/// Parameters of a session to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: String,
    pub ttl: Duration,
    pub behavior: SessionBehavior,
    pub lock_delay: Duration,
}

impl From<&LockConfig> for SessionRequest {
    fn from(config: &LockConfig) -> Self {
        Self {
            name: config.session_name().to_string(),
            ttl: config.session_ttl(),
            behavior: config.session_behavior(),
            lock_delay: config.lock_delay(),
        }
    }
}

/// Session and lock operations of a consistent, session-capable KV store.
///
/// The service is the only arbiter of who holds a key; implementations add
/// no lock state of their own.
#[async_trait]
pub trait SessionCoordinator: Send + Sync {
    /// Create a session and return its ID
    async fn create_session(&self, request: &SessionRequest) -> Result<String>;

    /// Extend a session's lease. Returns the TTL the service reports, if any.
    ///
    /// Fails with `SessionNotFound` once the session has expired or been destroyed.
    async fn renew_session(&self, session_id: &str, ttl: Duration) -> Result<Option<Duration>>;

    /// Destroy a session, freeing its keys. Idempotent.
    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    /// Associate `key` with `session_id`.
    ///
    /// Waits up to `wait_time` for another holder (or a lock delay) to clear
    /// and returns `Ok(false)` on timeout or as soon as `cancel` fires.
    async fn acquire_lock(
        &self,
        key: &str,
        session_id: &str,
        wait_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Clear the association of `key` with `session_id`; `LockNotHeld` if it is not held by it
    async fn release_lock(&self, key: &str, session_id: &str) -> Result<()>;
}
