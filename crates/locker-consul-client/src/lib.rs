// locker-consul-client: Consul HTTP client for sessions and session-bound KV locks

pub mod client;
pub mod config;
pub mod constants;
pub mod duration;
pub mod error;
pub mod model;

pub use client::ConsulClient;
pub use config::ConsulClientConfig;
pub use error::ConsulError;
pub use model::{KVPair, QueryMeta, QueryOptions, SessionCreateRequest, SessionEntry};
