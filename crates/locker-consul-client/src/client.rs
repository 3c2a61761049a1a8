// ConsulClient - session and KV lock endpoints of the Consul HTTP API

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::{
    config::ConsulClientConfig,
    constants::{api_path, header},
    error::{ConsulError, Result},
    model::{
        KVPair, QueryMeta, QueryOptions, SessionCreateRequest, SessionCreateResponse, SessionEntry,
    },
};

/// HTTP client for a single Consul agent
#[derive(Clone, Debug)]
pub struct ConsulClient {
    client: Client,
    config: ConsulClientConfig,
}

impl ConsulClient {
    /// Create a new client with the given configuration
    pub fn new(config: ConsulClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client configured from the `CONSUL_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(ConsulClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ConsulClientConfig {
        &self.config
    }

    /// Build full URL for an API path
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.config.address, path)
    }

    fn kv_url(&self, key: &str) -> String {
        self.build_url(&format!("{}/{}", api_path::KV, key.trim_start_matches('/')))
    }

    /// Start a request carrying the token header and datacenter parameter
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if !self.config.token.is_empty() {
            builder = builder.header(header::CONSUL_TOKEN, &self.config.token);
        }
        if !self.config.datacenter.is_empty() {
            builder = builder.query(&[("dc", self.config.datacenter.as_str())]);
        }
        builder
    }

    /// Turn non-success responses into errors
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ConsulError::NotFound(body));
        }
        Err(ConsulError::RequestFailed {
            status: status.as_u16(),
            body,
        })
    }

    // ============================================================================
    // Session APIs
    // ============================================================================

    /// Create a session and return its ID
    pub async fn session_create(&self, request: &SessionCreateRequest) -> Result<String> {
        let url = self.build_url(api_path::SESSION_CREATE);
        let response = self.request(Method::PUT, &url).json(request).send().await?;
        let created: SessionCreateResponse = Self::check(response).await?.json().await?;

        debug!(session_id = %created.id, name = ?request.name, "Session created");
        Ok(created.id)
    }

    /// Renew a session, returning the agent's view of it.
    ///
    /// Fails with [`ConsulError::NotFound`] once the session has expired or
    /// been destroyed.
    pub async fn session_renew(&self, session_id: &str) -> Result<SessionEntry> {
        let url = self.build_url(&format!("{}/{}", api_path::SESSION_RENEW, session_id));
        let response = self.request(Method::PUT, &url).send().await?;
        let entries: Vec<SessionEntry> = Self::check(response).await?.json().await?;

        entries
            .into_iter()
            .next()
            .ok_or_else(|| ConsulError::NotFound(format!("session '{}'", session_id)))
    }

    /// Destroy a session. Destroying an unknown session is not an error.
    pub async fn session_destroy(&self, session_id: &str) -> Result<bool> {
        let url = self.build_url(&format!("{}/{}", api_path::SESSION_DESTROY, session_id));
        let response = self.request(Method::PUT, &url).send().await?;
        let destroyed: bool = Self::check(response).await?.json().await?;

        debug!(session_id = %session_id, destroyed, "Session destroy requested");
        Ok(destroyed)
    }

    // ============================================================================
    // KV APIs
    // ============================================================================

    /// Read a single key, optionally as a blocking query.
    ///
    /// A missing key is `Ok((None, meta))`; the index is still reported so
    /// callers can block on the key's creation.
    pub async fn kv_get(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> Result<(Option<KVPair>, QueryMeta)> {
        let url = self.kv_url(key);
        let mut builder = self.request(Method::GET, &url);

        if options.is_blocking() {
            let wait = options.wait_time.unwrap_or_default();
            // Consul reads a zero wait as its default of several minutes
            let wait_ms = wait.as_nanos().div_ceil(1_000_000).max(1);
            builder = builder
                .query(&[
                    ("index", options.wait_index.to_string()),
                    ("wait", format!("{}ms", wait_ms)),
                ])
                // Consul may hold a blocking query up to wait + wait/16
                .timeout(Duration::from_millis(self.config.read_timeout_ms) + wait + wait / 16);
        }

        let response = builder.send().await?;
        let meta = QueryMeta {
            last_index: parse_index(&response),
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((None, meta));
        }

        let pairs: Vec<KVPair> = Self::check(response).await?.json().await?;
        Ok((pairs.into_iter().next(), meta))
    }

    /// Try to acquire `key` for `session_id`. Returns whether the agent granted it.
    pub async fn kv_acquire(
        &self,
        key: &str,
        session_id: &str,
        flags: u64,
        value: &[u8],
    ) -> Result<bool> {
        let url = self.kv_url(key);
        let response = self
            .request(Method::PUT, &url)
            .query(&[("acquire", session_id.to_string()), ("flags", flags.to_string())])
            .body(value.to_vec())
            .send()
            .await?;
        let acquired: bool = Self::check(response).await?.json().await?;

        debug!(key = %key, session_id = %session_id, acquired, "KV acquire");
        Ok(acquired)
    }

    /// Release `key` held by `session_id`. Returns `false` when the session does not hold it.
    pub async fn kv_release(&self, key: &str, session_id: &str, flags: u64) -> Result<bool> {
        let url = self.kv_url(key);
        let response = self
            .request(Method::PUT, &url)
            .query(&[("release", session_id.to_string()), ("flags", flags.to_string())])
            .send()
            .await?;
        let released: bool = Self::check(response).await?.json().await?;

        debug!(key = %key, session_id = %session_id, released, "KV release");
        Ok(released)
    }
}

fn parse_index(response: &Response) -> u64 {
    let Some(value) = response.headers().get(header::CONSUL_INDEX) else {
        return 0;
    };
    match value.to_str().ok().and_then(|v| v.parse().ok()) {
        Some(index) => index,
        None => {
            warn!(value = ?value, "Ignoring malformed X-Consul-Index header");
            0
        }
    }
}
