//! Background session renewal
//!
//! A [`RenewalLoop`] keeps one session alive by renewing it every half TTL
//! until it is stopped or the session can no longer be kept. When the loop
//! gives up it cancels its `session_lost` token; it never recreates the
//! session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::coordinator::SessionCoordinator;
use crate::error::LockError;

/// Pause between renewal attempts after a transient failure
pub const RENEWAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct RenewalLoop {
    session_id: String,
    stop: CancellationToken,
    lost: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RenewalLoop {
    /// Spawn the renewal task for `session_id` on the current runtime
    pub fn start(
        coordinator: Arc<dyn SessionCoordinator>,
        session_id: String,
        ttl: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let task = tokio::spawn(run(
            coordinator,
            session_id.clone(),
            ttl,
            stop.clone(),
            lost.clone(),
        ));

        Self {
            session_id,
            stop,
            lost,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancelled once the loop has given up on the session
    pub fn session_lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(session_id = %self.session_id, error = %e, "Renewal task panicked");
        }
    }
}

impl Drop for RenewalLoop {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    coordinator: Arc<dyn SessionCoordinator>,
    session_id: String,
    mut ttl: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut last_renewed = Instant::now();
    let mut delay = ttl / 2;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            result = coordinator.renew_session(&session_id, ttl) => result,
        };

        match result {
            Ok(reported) => {
                last_renewed = Instant::now();
                if let Some(reported) = reported.filter(|t| !t.is_zero() && *t != ttl) {
                    debug!(
                        session_id = %session_id,
                        ttl = ?reported,
                        "Session TTL changed by the service"
                    );
                    ttl = reported;
                }
                delay = ttl / 2;
            }
            Err(LockError::SessionNotFound(_)) => {
                warn!(session_id = %session_id, "Session is gone, stopping renewal");
                lost.cancel();
                return;
            }
            Err(e) => {
                if last_renewed.elapsed() >= ttl {
                    error!(
                        session_id = %session_id,
                        error = %e,
                        "Session not renewed within its TTL, stopping renewal"
                    );
                    lost.cancel();
                    return;
                }
                warn!(session_id = %session_id, error = %e, "Session renewal failed, retrying");
                delay = RENEWAL_RETRY_BACKOFF;
            }
        }
    }
}
