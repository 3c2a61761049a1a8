//! In-memory coordination service
//!
//! Implements [`SessionCoordinator`] inside the process with the same
//! semantics the lock relies on from Consul:
//! - sessions expire when not renewed within their TTL
//! - invalidation (destroy or expiry) applies the session behavior to every
//!   key the session holds
//! - once a hold on a key is cleared, nobody may acquire the key until the
//!   holder's lock delay has elapsed
//! - contended acquires block on key changes instead of polling

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{MAX_LOCK_DELAY, MAX_SESSION_TTL, MIN_SESSION_TTL, SessionBehavior};
use crate::coordinator::{SessionCoordinator, SessionRequest};
use crate::error::{LockError, Result};

struct StoredSession {
    request: SessionRequest,
    expires_at: Instant,
}

struct StoredKey {
    session: Option<String>,
    lock_index: u64,
    modify_index: u64,
}

/// Snapshot of a key as seen by [`MemoryCoordinator::key_entry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub session: Option<String>,
    pub lock_index: u64,
    pub modify_index: u64,
}

enum Attempt {
    Acquired,
    /// Someone else holds the key or a lock delay is running; retry no later than `retry_at`
    Blocked { retry_at: Option<Instant> },
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, StoredSession>,
    keys: HashMap<String, StoredKey>,
    /// key -> instant until which the key may not be acquired
    lock_delays: HashMap<String, Instant>,
    index: u64,
}

impl MemoryState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Invalidate every session whose lease has run out. Returns whether any did.
    fn expire_sessions(&mut self, now: Instant) -> bool {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            debug!(session_id = %session_id, "Session TTL expired");
            self.invalidate(session_id, now);
        }
        !expired.is_empty()
    }

    /// Remove a session and apply its behavior to the keys it holds
    fn invalidate(&mut self, session_id: &str, now: Instant) -> bool {
        let Some(session) = self.sessions.remove(session_id) else {
            return false;
        };

        let held: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, k)| k.session.as_deref() == Some(session_id))
            .map(|(key, _)| key.clone())
            .collect();

        for key in held {
            match session.request.behavior {
                SessionBehavior::Release => {
                    let index = self.next_index();
                    if let Some(entry) = self.keys.get_mut(&key) {
                        entry.session = None;
                        entry.modify_index = index;
                    }
                }
                SessionBehavior::Delete => {
                    self.keys.remove(&key);
                }
            }
            self.start_lock_delay(&key, session.request.lock_delay, now);
        }
        true
    }

    fn start_lock_delay(&mut self, key: &str, lock_delay: Duration, now: Instant) {
        if !lock_delay.is_zero() {
            self.lock_delays.insert(key.to_string(), now + lock_delay);
        }
    }

    fn try_acquire(&mut self, key: &str, session_id: &str, now: Instant) -> Result<Attempt> {
        if !self.sessions.contains_key(session_id) {
            return Err(LockError::SessionNotFound(session_id.to_string()));
        }

        if let Some(entry) = self.keys.get(key) {
            match entry.session.as_deref() {
                Some(holder) if holder == session_id => return Ok(Attempt::Acquired),
                Some(holder) => {
                    let retry_at = self.sessions.get(holder).map(|s| s.expires_at);
                    return Ok(Attempt::Blocked { retry_at });
                }
                None => {}
            }
        }

        if let Some(&until) = self.lock_delays.get(key) {
            if until > now {
                return Ok(Attempt::Blocked {
                    retry_at: Some(until),
                });
            }
            self.lock_delays.remove(key);
        }

        let index = self.next_index();
        let entry = self.keys.entry(key.to_string()).or_insert(StoredKey {
            session: None,
            lock_index: 0,
            modify_index: index,
        });
        entry.session = Some(session_id.to_string());
        entry.lock_index += 1;
        entry.modify_index = index;
        Ok(Attempt::Acquired)
    }
}

/// Process-local coordination service with Consul session and lock semantics
pub struct MemoryCoordinator {
    state: Mutex<MemoryState>,
    /// Woken on every change that may let a blocked acquire proceed
    changed: Notify,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            changed: Notify::new(),
        }
    }

    /// Run lazy expiry, then `f` on the state, waking waiters if expiry changed anything
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState, Instant) -> T) -> T {
        let mut state = self.state.lock();
        let now = Instant::now();
        let expired = state.expire_sessions(now);
        state.lock_delays.retain(|_, until| *until > now);
        let result = f(&mut state, now);
        drop(state);

        if expired {
            self.changed.notify_waiters();
        }
        result
    }

    /// Invalidate a session out-of-band, as a failed health check or an
    /// operator would. Returns whether the session existed.
    pub fn invalidate_session(&self, session_id: &str) -> bool {
        let invalidated = self.with_state(|state, now| state.invalidate(session_id, now));
        if invalidated {
            info!(session_id = %session_id, "Session invalidated");
            self.changed.notify_waiters();
        }
        invalidated
    }

    pub fn is_session_live(&self, session_id: &str) -> bool {
        self.with_state(|state, _| state.sessions.contains_key(session_id))
    }

    pub fn session_count(&self) -> usize {
        self.with_state(|state, _| state.sessions.len())
    }

    /// Session currently holding `key`
    pub fn holder(&self, key: &str) -> Option<String> {
        self.key_entry(key).and_then(|entry| entry.session)
    }

    pub fn key_entry(&self, key: &str) -> Option<KeyEntry> {
        self.with_state(|state, _| {
            state.keys.get(key).map(|k| KeyEntry {
                session: k.session.clone(),
                lock_index: k.lock_index,
                modify_index: k.modify_index,
            })
        })
    }
}

#[async_trait]
impl SessionCoordinator for MemoryCoordinator {
    async fn create_session(&self, request: &SessionRequest) -> Result<String> {
        if request.ttl < MIN_SESSION_TTL || request.ttl > MAX_SESSION_TTL {
            return Err(LockError::InvalidConfiguration(format!(
                "session TTL {:?} must be between {:?} and {:?}",
                request.ttl, MIN_SESSION_TTL, MAX_SESSION_TTL
            )));
        }
        if request.lock_delay > MAX_LOCK_DELAY {
            return Err(LockError::InvalidConfiguration(format!(
                "lock delay {:?} must not exceed {:?}",
                request.lock_delay, MAX_LOCK_DELAY
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        self.with_state(|state, now| {
            state.sessions.insert(
                session_id.clone(),
                StoredSession {
                    request: request.clone(),
                    expires_at: now + request.ttl,
                },
            );
        });

        debug!(session_id = %session_id, name = %request.name, "Session created");
        Ok(session_id)
    }

    async fn renew_session(&self, session_id: &str, _ttl: Duration) -> Result<Option<Duration>> {
        self.with_state(|state, now| match state.sessions.get_mut(session_id) {
            Some(session) => {
                session.expires_at = now + session.request.ttl;
                Ok(Some(session.request.ttl))
            }
            None => Err(LockError::SessionNotFound(session_id.to_string())),
        })
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        if self.with_state(|state, now| state.invalidate(session_id, now)) {
            debug!(session_id = %session_id, "Session destroyed");
            self.changed.notify_waiters();
        }
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        session_id: &str,
        wait_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let deadline = Instant::now() + wait_time;

        loop {
            // Register for change notifications before looking at the state so
            // a release between the check and the wait is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Ok(false);
            }

            let attempt = self.with_state(|state, now| state.try_acquire(key, session_id, now))?;
            let retry_at = match attempt {
                Attempt::Acquired => return Ok(true),
                Attempt::Blocked { retry_at } => retry_at,
            };

            if Instant::now() >= deadline {
                return Ok(false);
            }
            let wake_at = retry_at.map_or(deadline, |at| at.min(deadline));

            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn release_lock(&self, key: &str, session_id: &str) -> Result<()> {
        let released = self.with_state(|state, now| {
            let lock_delay = state.sessions.get(session_id)?.request.lock_delay;
            let held = state
                .keys
                .get(key)
                .is_some_and(|k| k.session.as_deref() == Some(session_id));
            if !held {
                return None;
            }
            let index = state.next_index();
            let entry = state.keys.get_mut(key)?;
            entry.session = None;
            entry.modify_index = index;
            state.start_lock_delay(key, lock_delay, now);
            Some(())
        });

        match released {
            Some(()) => {
                self.changed.notify_waiters();
                Ok(())
            }
            None => Err(LockError::LockNotHeld(key.to_string())),
        }
    }
}
