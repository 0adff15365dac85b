use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

const USER_AGENT_STRING: &str = "comic-vault/1.0";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors at the wire boundary, before any interpretation of the payload.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The remote reports the resource does not exist.
    #[error("resource not found")]
    NotFound,

    /// Any other non-success HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Connection, DNS, TLS, or timeout failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// Injectable fetch primitive: a URL in, raw bytes or an error out.
///
/// Timeouts are the implementation's responsibility and surface as
/// [`TransportError::Request`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Production transport over reqwest.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT_STRING)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TransportError::NotFound),
            status if !status.is_success() => Err(TransportError::Status(status.as_u16())),
            _ => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Request(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }
}
