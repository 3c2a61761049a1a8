// Consul HTTP API constants

pub mod api_path {
    // Session
    pub const SESSION_CREATE: &str = "/v1/session/create";
    pub const SESSION_RENEW: &str = "/v1/session/renew";
    pub const SESSION_DESTROY: &str = "/v1/session/destroy";

    // KV
    pub const KV: &str = "/v1/kv";
}

pub mod header {
    pub const CONSUL_TOKEN: &str = "X-Consul-Token";
    pub const CONSUL_INDEX: &str = "X-Consul-Index";
}

/// Session behaviors accepted by `/v1/session/create`
pub const SESSION_BEHAVIOR_RELEASE: &str = "release";
pub const SESSION_BEHAVIOR_DELETE: &str = "delete";

/// Flags value written on lock entries, matching the official Consul lock helpers.
pub const LOCK_FLAG_VALUE: u64 = 0x2ddccbc058a50c18;
