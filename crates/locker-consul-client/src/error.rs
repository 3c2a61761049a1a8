// Error types for ConsulClient

/// Errors that can occur while talking to a Consul agent
#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ConsulError {
    /// Whether the agent rejected the request itself (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self, ConsulError::RequestFailed { status, .. } if (400..500).contains(status))
    }

    /// Whether the agent refused a write because the session is gone.
    ///
    /// Consul answers KV writes against a dead session with a 500 and an
    /// "invalid session" message rather than a 404.
    pub fn is_invalid_session(&self) -> bool {
        match self {
            ConsulError::RequestFailed { body, .. } => {
                let body = body.to_ascii_lowercase();
                body.contains("invalid session") || body.contains("session not found")
            }
            ConsulError::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsulError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsulError::RequestFailed {
            status: 500,
            body: "rpc error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request failed with status 500: rpc error"
        );

        let err = ConsulError::NotFound("session 'abc'".to_string());
        assert_eq!(err.to_string(), "Not found: session 'abc'");
    }

    #[test]
    fn test_error_classification() {
        let bad_request = ConsulError::RequestFailed {
            status: 400,
            body: "Invalid Session TTL '1s', must be between [10s=24h0m0s]".to_string(),
        };
        assert!(bad_request.is_client_error());
        assert!(!bad_request.is_invalid_session());

        let invalid_session = ConsulError::RequestFailed {
            status: 500,
            body: "invalid session \"abc\"".to_string(),
        };
        assert!(!invalid_session.is_client_error());
        assert!(invalid_session.is_invalid_session());
    }
}
