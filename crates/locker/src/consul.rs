// Consul-backed SessionCoordinator
//
// Sessions map onto /v1/session/*, locks onto session-bound KV acquire and
// release. Waiting for a contested key follows the Consul lock recipe: long
// poll the key with a blocking query while someone holds it, and fall back
// to a timed retry when the key is free but the acquire is refused because a
// lock delay is still running.

use std::time::Duration;

use async_trait::async_trait;
use locker_consul_client::constants::LOCK_FLAG_VALUE;
use locker_consul_client::duration::format_duration;
use locker_consul_client::{
    ConsulClient, ConsulClientConfig, ConsulError, KVPair, QueryOptions, SessionCreateRequest,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coordinator::{SessionCoordinator, SessionRequest};
use crate::error::{LockError, Result};

/// Pause before retrying an acquire refused while the key was free (lock delay)
pub const DEFAULT_LOCK_RETRY_TIME: Duration = Duration::from_secs(5);

/// Shortest wait a blocking read can express; less remaining time counts as spent
const MIN_BLOCKING_WAIT: Duration = Duration::from_millis(1);

/// Coordinator talking to a Consul agent over HTTP
#[derive(Clone, Debug)]
pub struct ConsulCoordinator {
    client: ConsulClient,
    lock_retry_time: Duration,
}

impl ConsulCoordinator {
    pub fn new(client: ConsulClient) -> Self {
        Self {
            client,
            lock_retry_time: DEFAULT_LOCK_RETRY_TIME,
        }
    }

    /// Connect to the agent described by the `CONSUL_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(ConsulClient::from_env()?))
    }

    pub fn with_config(config: ConsulClientConfig) -> anyhow::Result<Self> {
        Ok(Self::new(ConsulClient::new(config)?))
    }

    pub fn with_lock_retry_time(mut self, lock_retry_time: Duration) -> Self {
        self.lock_retry_time = lock_retry_time;
        self
    }

    pub fn client(&self) -> &ConsulClient {
        &self.client
    }

    /// Read the key, giving up with `None` if `cancel` fires first
    async fn read_key(
        &self,
        key: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<(Option<KVPair>, u64)>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            read = self.client.kv_get(key, options) => {
                let (pair, meta) = read.map_err(unavailable)?;
                Ok(Some((pair, meta.last_index)))
            }
        }
    }
}

fn unavailable(err: ConsulError) -> LockError {
    LockError::CoordinationUnavailable(err.to_string())
}

#[async_trait]
impl SessionCoordinator for ConsulCoordinator {
    async fn create_session(&self, request: &SessionRequest) -> Result<String> {
        let body = SessionCreateRequest {
            name: Some(request.name.clone()),
            ttl: Some(format_duration(request.ttl)),
            behavior: Some(request.behavior.as_str().to_string()),
            lock_delay: Some(format_duration(request.lock_delay)),
        };

        self.client.session_create(&body).await.map_err(|e| {
            if e.is_client_error() {
                LockError::InvalidConfiguration(e.to_string())
            } else {
                unavailable(e)
            }
        })
    }

    async fn renew_session(&self, session_id: &str, _ttl: Duration) -> Result<Option<Duration>> {
        match self.client.session_renew(session_id).await {
            Ok(entry) => Ok(entry.ttl_duration()),
            Err(ConsulError::NotFound(_)) => {
                Err(LockError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        match self.client.session_destroy(session_id).await {
            Ok(_) | Err(ConsulError::NotFound(_)) => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn acquire_lock(
        &self,
        key: &str,
        session_id: &str,
        wait_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let deadline = Instant::now() + wait_time;
        let mut wait_index = 0;
        let mut attempted = false;

        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempted && remaining < MIN_BLOCKING_WAIT {
                debug!(key = %key, "Lock wait time elapsed");
                return Ok(false);
            }
            attempted = true;

            let options = if wait_index > 0 {
                QueryOptions::blocking(wait_index, remaining)
            } else {
                QueryOptions::default()
            };
            let Some((pair, index)) = self.read_key(key, &options, cancel).await? else {
                return Ok(false);
            };

            if let Some(pair) = &pair {
                if pair.flags != LOCK_FLAG_VALUE {
                    return Err(LockError::LockConflict(key.to_string()));
                }
                match pair.holder() {
                    Some(holder) if holder == session_id => return Ok(true),
                    Some(holder) => {
                        debug!(key = %key, holder = %holder, index, "Lock held elsewhere, waiting");
                        wait_index = index;
                        continue;
                    }
                    None => {}
                }
            }

            // Not raced with cancel; a granted key must be recorded
            let acquired = self
                .client
                .kv_acquire(key, session_id, LOCK_FLAG_VALUE, &[])
                .await
                .map_err(|e| {
                    if e.is_invalid_session() {
                        LockError::SessionNotFound(session_id.to_string())
                    } else {
                        unavailable(e)
                    }
                })?;
            if acquired {
                return Ok(true);
            }

            // Refused: either someone beat us to it or a lock delay is running
            let reread = self.read_key(key, &QueryOptions::default(), cancel).await?;
            let Some((pair, index)) = reread else {
                return Ok(false);
            };
            if pair.as_ref().and_then(|p| p.holder()).is_some() {
                wait_index = index;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let pause = self.lock_retry_time.min(remaining);
            debug!(key = %key, pause = ?pause, "Acquire refused on a free key, lock delay running");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(pause) => {}
            }
            wait_index = 0;
        }
    }

    async fn release_lock(&self, key: &str, session_id: &str) -> Result<()> {
        match self.client.kv_release(key, session_id, LOCK_FLAG_VALUE).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LockError::LockNotHeld(key.to_string())),
            Err(e) if e.is_invalid_session() => {
                warn!(key = %key, session_id = %session_id, "Release with an invalidated session");
                Err(LockError::LockNotHeld(key.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_time() {
        let config = ConsulClientConfig::new("http://127.0.0.1:8500");
        let coordinator = ConsulCoordinator::with_config(config).unwrap();
        assert_eq!(coordinator.lock_retry_time, DEFAULT_LOCK_RETRY_TIME);

        let coordinator = coordinator.with_lock_retry_time(Duration::from_millis(100));
        assert_eq!(coordinator.lock_retry_time, Duration::from_millis(100));
        assert_eq!(coordinator.client().config().address, "http://127.0.0.1:8500");
    }

    #[test]
    fn test_error_mapping() {
        let err = unavailable(ConsulError::RequestFailed {
            status: 503,
            body: "No cluster leader".to_string(),
        });
        assert!(matches!(err, LockError::CoordinationUnavailable(_)));
    }
}
