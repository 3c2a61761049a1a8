//! Locker - distributed mutual exclusion on a Consul-style session service
//!
//! This crate provides:
//! - `LockHandle`, the per-key lock state machine owning one session
//! - Background session renewal at half the session TTL
//! - A Consul HTTP coordinator and an in-memory coordinator with the same
//!   session, expiry behavior and lock-delay semantics
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use locker::{CancellationToken, ConsulCoordinator, LockConfig, LockHandle};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let coordinator = Arc::new(ConsulCoordinator::from_env()?);
//! let lock = LockHandle::new(coordinator, "service/leader", LockConfig::from_env()?).await?;
//!
//! if lock.acquire(&CancellationToken::new()).await? {
//!     // critical section
//!     lock.release().await?;
//! }
//! lock.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consul;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod memory;
pub mod renewal;

pub use config::{LockConfig, LockConfigBuilder, SessionBehavior};
pub use consul::ConsulCoordinator;
pub use coordinator::{SessionCoordinator, SessionRequest};
pub use error::{LockError, Result};
pub use handle::{LockHandle, LockState};
pub use memory::MemoryCoordinator;
pub use renewal::RenewalLoop;

pub use tokio_util::sync::CancellationToken;
