//! Lock handle state machine
//!
//! A [`LockHandle`] binds one key to one session it owns. The session is
//! created with the handle and kept alive by a [`RenewalLoop`] until
//! [`LockHandle::destroy`] tears both down.
//!
//! ```text
//! Unlocked --acquire--> Locked --release--> Unlocked
//!     \                   |
//!      `----destroy-------+----> Destroyed
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::coordinator::{SessionCoordinator, SessionRequest};
use crate::error::{LockError, Result};
use crate::renewal::RenewalLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    Destroyed,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unlocked => write!(f, "unlocked"),
            LockState::Locked => write!(f, "locked"),
            LockState::Destroyed => write!(f, "destroyed"),
        }
    }
}

struct HandleInner {
    state: LockState,
    renewal: Option<RenewalLoop>,
}

/// Distributed mutual-exclusion lock on a single key.
///
/// `state` is a local view of the coordination service's key -> session
/// association and can be stale after the service invalidates the session;
/// watch [`LockHandle::session_lost`] to learn about that.
pub struct LockHandle {
    key: String,
    session_id: String,
    config: LockConfig,
    coordinator: Arc<dyn SessionCoordinator>,
    inner: Mutex<HandleInner>,
    session_lost: CancellationToken,
}

impl LockHandle {
    /// Validate `config`, create the session and start renewing it
    pub async fn new(
        coordinator: Arc<dyn SessionCoordinator>,
        key: impl Into<String>,
        config: LockConfig,
    ) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(LockError::InvalidConfiguration(
                "lock key must not be empty".to_string(),
            ));
        }
        config.validate()?;

        let session_id = coordinator
            .create_session(&SessionRequest::from(&config))
            .await?;
        let renewal =
            RenewalLoop::start(coordinator.clone(), session_id.clone(), config.session_ttl());
        let session_lost = renewal.session_lost();

        info!(
            key = %key,
            session_id = %session_id,
            ttl = ?config.session_ttl(),
            behavior = %config.session_behavior(),
            "Lock handle created"
        );

        Ok(Self {
            key,
            session_id,
            config,
            coordinator,
            inner: Mutex::new(HandleInner {
                state: LockState::Unlocked,
                renewal: Some(renewal),
            }),
            session_lost,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Cancelled when the session has been lost and renewal has stopped
    pub fn session_lost(&self) -> CancellationToken {
        self.session_lost.clone()
    }

    pub async fn state(&self) -> LockState {
        self.inner.lock().await.state
    }

    pub async fn is_locked(&self) -> bool {
        self.state().await == LockState::Locked
    }

    /// Try to take the lock, waiting up to the configured lock wait time.
    ///
    /// Returns `Ok(false)` when the wait time elapses or `cancel` fires
    /// before the lock could be taken.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            LockState::Destroyed => return Err(LockError::HandleDestroyed),
            LockState::Locked => return Err(LockError::AlreadyHeld(self.key.clone())),
            LockState::Unlocked => {}
        }
        if self.session_lost.is_cancelled() {
            return Err(LockError::SessionNotFound(self.session_id.clone()));
        }

        let acquired = self
            .coordinator
            .acquire_lock(&self.key, &self.session_id, self.config.lock_wait_time(), cancel)
            .await?;

        if acquired {
            inner.state = LockState::Locked;
            debug!(key = %self.key, session_id = %self.session_id, "Lock acquired");
        } else {
            debug!(key = %self.key, cancelled = cancel.is_cancelled(), "Lock not acquired");
        }
        Ok(acquired)
    }

    /// Release a held lock. The session stays alive for later acquires.
    pub async fn release(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            LockState::Destroyed => return Err(LockError::HandleDestroyed),
            LockState::Unlocked => return Err(LockError::LockNotHeld(self.key.clone())),
            LockState::Locked => {}
        }

        match self.coordinator.release_lock(&self.key, &self.session_id).await {
            Ok(()) => {
                inner.state = LockState::Unlocked;
                debug!(key = %self.key, session_id = %self.session_id, "Lock released");
                Ok(())
            }
            Err(e @ LockError::LockNotHeld(_)) => {
                // The service no longer associates the key with us
                warn!(key = %self.key, session_id = %self.session_id, "Lock lost before release");
                inner.state = LockState::Unlocked;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop renewal, release the lock if held and destroy the session.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. Calling it again is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == LockState::Destroyed {
            return Ok(());
        }

        let mut first_error = None;

        if let Some(mut renewal) = inner.renewal.take() {
            renewal.stop().await;
        }

        if inner.state == LockState::Locked {
            match self.coordinator.release_lock(&self.key, &self.session_id).await {
                Ok(()) | Err(LockError::LockNotHeld(_)) => {}
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Release during destroy failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.coordinator.destroy_session(&self.session_id).await {
            warn!(session_id = %self.session_id, error = %e, "Session destroy failed");
            first_error.get_or_insert(e);
        }

        inner.state = LockState::Destroyed;
        info!(key = %self.key, session_id = %self.session_id, "Lock handle destroyed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.inner.get_mut().state != LockState::Destroyed {
            warn!(
                key = %self.key,
                session_id = %self.session_id,
                "Lock handle dropped without destroy, session will expire after its TTL"
            );
        }
    }
}
