// Configuration for ConsulClient

use config::{Config, Environment};

/// Default agent address used when nothing else is configured
pub const DEFAULT_CONSUL_ADDRESS: &str = "http://127.0.0.1:8500";

/// Configuration for the Consul HTTP client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsulClientConfig {
    /// Agent address (e.g. "http://127.0.0.1:8500")
    pub address: String,
    /// ACL token sent as `X-Consul-Token` (empty for anonymous access)
    pub token: String,
    /// Datacenter to target (empty for the agent's own datacenter)
    pub datacenter: String,
    /// Connection timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (default: 30000)
    ///
    /// Blocking queries extend this by their own wait time.
    pub read_timeout_ms: u64,
}

impl Default for ConsulClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONSUL_ADDRESS.to_string(),
            token: String::new(),
            datacenter: String::new(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
        }
    }
}

impl ConsulClientConfig {
    /// Create a new config for a single agent address
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address),
            ..Default::default()
        }
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    /// Set the datacenter
    pub fn with_datacenter(mut self, datacenter: &str) -> Self {
        self.datacenter = datacenter.to_string();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Load the config from `CONSUL_HTTP_ADDR`, `CONSUL_HTTP_TOKEN` and
    /// `CONSUL_DATACENTER`, falling back to defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("CONSUL"))
            .build()?;
        Ok(Self::from_settings(&settings))
    }

    /// Build the config from already loaded settings (keys without the `CONSUL_` prefix)
    pub fn from_settings(settings: &Config) -> Self {
        let mut config = Self::default();

        if let Ok(address) = settings.get_string("http_addr")
            && !address.trim().is_empty()
        {
            config.address = normalize_address(&address);
        }
        if let Ok(token) = settings.get_string("http_token") {
            config.token = token;
        }
        if let Ok(datacenter) = settings.get_string("datacenter") {
            config.datacenter = datacenter;
        }

        config
    }
}

/// Add a scheme when missing and strip trailing slashes.
///
/// `CONSUL_HTTP_ADDR` is commonly given as a bare `host:port`.
fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ConsulClientConfig::default();
        assert_eq!(config.address, "http://127.0.0.1:8500");
        assert!(config.token.is_empty());
        assert!(config.datacenter.is_empty());
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.read_timeout_ms, 30000);
    }

    #[test]
    fn test_config_builder() {
        let config = ConsulClientConfig::new("consul.service:8500/")
            .with_token("secret")
            .with_datacenter("dc2")
            .with_timeouts(1000, 2000);

        assert_eq!(config.address, "http://consul.service:8500");
        assert_eq!(config.token, "secret");
        assert_eq!(config.datacenter, "dc2");
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.read_timeout_ms, 2000);
    }

    #[test]
    fn test_normalize_address_keeps_https() {
        assert_eq!(
            normalize_address("https://consul.example.com:8501"),
            "https://consul.example.com:8501"
        );
    }

    #[test]
    fn test_from_settings() {
        let settings = Config::builder()
            .set_override("http_addr", "10.0.0.5:8500")
            .unwrap()
            .set_override("http_token", "acl-token")
            .unwrap()
            .build()
            .unwrap();

        let config = ConsulClientConfig::from_settings(&settings);
        assert_eq!(config.address, "http://10.0.0.5:8500");
        assert_eq!(config.token, "acl-token");
        assert!(config.datacenter.is_empty());
    }

    #[test]
    fn test_from_settings_empty() {
        let settings = Config::builder().build().unwrap();
        assert_eq!(
            ConsulClientConfig::from_settings(&settings),
            ConsulClientConfig::default()
        );
    }
}
