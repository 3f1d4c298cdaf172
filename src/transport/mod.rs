//! HTTP execution layer for MCP servers
//!
//! Requests flow through a chain of [`HttpClient`] implementations; the
//! OAuth middleware wraps any inner client and handles the bearer-token
//! lifecycle transparently.

mod oauth;

pub use self::oauth::OAuthHttpClient;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// An HTTP request executor. Middleware composes by wrapping another
/// implementation.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return the response.
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// Plain executor backed by a [`reqwest::Client`]; the innermost link of
/// every chain.
pub struct PlainHttpClient {
    client: reqwest::Client,
}

impl PlainHttpClient {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client with connection pooling suited to long-lived MCP
    /// sessions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the client cannot be constructed.
    pub fn with_defaults(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for PlainHttpClient {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        Ok(self.client.execute(request).await?)
    }
}
