//! Lock configuration
//!
//! [`LockConfig`] is an immutable parameter bundle validated once, either by
//! [`LockConfigBuilder::build`] or when a lock handle is constructed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment};
use locker_consul_client::constants::{SESSION_BEHAVIOR_DELETE, SESSION_BEHAVIOR_RELEASE};
use locker_consul_client::duration::parse_duration;
use serde::Deserialize;

use crate::error::{LockError, Result};

pub const DEFAULT_LOCK_SESSION_NAME: &str = "Consul API Lock";
pub const DEFAULT_LOCK_SESSION_TTL: Duration = Duration::from_secs(15);
pub const DEFAULT_LOCK_WAIT_TIME: Duration = Duration::from_secs(15);

/// Session TTL bounds accepted by Consul
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(10);
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest lock delay accepted by Consul
pub const MAX_LOCK_DELAY: Duration = Duration::from_secs(60);

/// What happens to keys held by a session when the session is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionBehavior {
    /// Free the key for other sessions
    Release,
    /// Free the key and delete it
    #[default]
    Delete,
}

impl SessionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBehavior::Release => SESSION_BEHAVIOR_RELEASE,
            SessionBehavior::Delete => SESSION_BEHAVIOR_DELETE,
        }
    }
}

impl fmt::Display for SessionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionBehavior {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            SESSION_BEHAVIOR_RELEASE => Ok(SessionBehavior::Release),
            SESSION_BEHAVIOR_DELETE => Ok(SessionBehavior::Delete),
            other => Err(LockError::InvalidConfiguration(format!(
                "unknown session behavior '{}', expected 'release' or 'delete'",
                other
            ))),
        }
    }
}

/// Parameters for a lock handle and the session it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    session_name: String,
    session_ttl: Duration,
    session_behavior: SessionBehavior,
    lock_delay: Duration,
    lock_wait_time: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_LOCK_SESSION_NAME.to_string(),
            session_ttl: DEFAULT_LOCK_SESSION_TTL,
            session_behavior: SessionBehavior::default(),
            lock_delay: Duration::ZERO,
            lock_wait_time: DEFAULT_LOCK_WAIT_TIME,
        }
    }
}

impl LockConfig {
    pub fn builder() -> LockConfigBuilder {
        LockConfigBuilder::default()
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Time after which an unrenewed session is invalidated
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn session_behavior(&self) -> SessionBehavior {
        self.session_behavior
    }

    /// Cool-down after this session's hold on a key is cleared, before anyone may take it again
    pub fn lock_delay(&self) -> Duration {
        self.lock_delay
    }

    /// How long a single acquire waits for a contested key
    pub fn lock_wait_time(&self) -> Duration {
        self.lock_wait_time
    }

    /// Check every parameter against the ranges the coordination service accepts
    pub fn validate(&self) -> Result<()> {
        if self.session_name.trim().is_empty() {
            return Err(LockError::InvalidConfiguration(
                "session name must not be empty".to_string(),
            ));
        }
        if self.session_ttl < MIN_SESSION_TTL || self.session_ttl > MAX_SESSION_TTL {
            return Err(LockError::InvalidConfiguration(format!(
                "session TTL {:?} must be between {:?} and {:?}",
                self.session_ttl, MIN_SESSION_TTL, MAX_SESSION_TTL
            )));
        }
        if self.lock_delay > MAX_LOCK_DELAY {
            return Err(LockError::InvalidConfiguration(format!(
                "lock delay {:?} must not exceed {:?}",
                self.lock_delay, MAX_LOCK_DELAY
            )));
        }
        Ok(())
    }

    /// Load the config from `LOCKER_*` environment variables.
    ///
    /// Recognized: `LOCKER_SESSION_NAME`, `LOCKER_SESSION_TTL`,
    /// `LOCKER_SESSION_BEHAVIOR`, `LOCKER_LOCK_DELAY`, `LOCKER_LOCK_WAIT_TIME`.
    /// Durations use the "15s" / "500ms" form.
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("LOCKER"))
            .build()
            .map_err(|e| LockError::InvalidConfiguration(e.to_string()))?;
        Self::from_settings(&settings)
    }

    /// Build the config from already loaded settings, defaulting unset values
    pub fn from_settings(settings: &Config) -> Result<Self> {
        let raw: RawLockSettings = settings
            .clone()
            .try_deserialize()
            .map_err(|e| LockError::InvalidConfiguration(e.to_string()))?;

        let mut builder = Self::builder();
        if let Some(name) = raw.session_name {
            builder = builder.session_name(name);
        }
        if let Some(ttl) = raw.session_ttl {
            builder = builder.session_ttl(parse_setting("session_ttl", &ttl)?);
        }
        if let Some(behavior) = raw.session_behavior {
            builder = builder.session_behavior(behavior.parse()?);
        }
        if let Some(delay) = raw.lock_delay {
            builder = builder.lock_delay(parse_setting("lock_delay", &delay)?);
        }
        if let Some(wait) = raw.lock_wait_time {
            builder = builder.lock_wait_time(parse_setting("lock_wait_time", &wait)?);
        }
        builder.build()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawLockSettings {
    session_name: Option<String>,
    session_ttl: Option<String>,
    session_behavior: Option<String>,
    lock_delay: Option<String>,
    lock_wait_time: Option<String>,
}

fn parse_setting(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| {
        LockError::InvalidConfiguration(format!("{} '{}' is not a valid duration", name, value))
    })
}

/// Builder for [`LockConfig`]; unset values keep their defaults
#[derive(Debug, Clone, Default)]
pub struct LockConfigBuilder {
    config: LockConfig,
}

impl LockConfigBuilder {
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.config.session_behavior = behavior;
        self
    }

    pub fn lock_delay(mut self, lock_delay: Duration) -> Self {
        self.config.lock_delay = lock_delay;
        self
    }

    pub fn lock_wait_time(mut self, lock_wait_time: Duration) -> Self {
        self.config.lock_wait_time = lock_wait_time;
        self
    }

    pub fn build(self) -> Result<LockConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
