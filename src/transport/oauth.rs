//! OAuth bearer middleware
//!
//! Wraps an inner [`HttpClient`] to attach, refresh, and retry bearer
//! tokens transparently.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use reqwest::StatusCode;
use tracing::debug;

use super::HttpClient;
use crate::provider::TokenProvider;
use crate::{Error, Result};

/// [`HttpClient`] middleware that authenticates every request with a bearer
/// token from a [`TokenProvider`] and retries once after a 401.
pub struct OAuthHttpClient {
    provider: Arc<dyn TokenProvider>,
    inner: Arc<dyn HttpClient>,
    lock: tokio::sync::Mutex<()>,
}

impl OAuthHttpClient {
    /// Layer OAuth authentication over `inner`.
    pub fn new(provider: Arc<dyn TokenProvider>, inner: Arc<dyn HttpClient>) -> Self {
        Self {
            provider,
            inner,
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl HttpClient for OAuthHttpClient {
    async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        // Held for the whole call: concurrent requests to the same server
        // serialize here, so a single expiry is resolved by exactly one
        // refresh or interactive flow.
        let _guard = self.lock.lock().await;

        let host = request.url().host_str().unwrap_or_default().to_string();

        let mut token = self.provider.ensure_token().await?;

        if token.is_expired() {
            debug!(mcp = %host, "OAuth token expired, refreshing");
            token = self.provider.refresh_token().await?;
        }

        // Keep a clone for the 401 retry; streaming bodies cannot be
        // replayed, in which case the first response is final.
        let retry_request = request.try_clone();

        set_bearer(&mut request, &token.access_token)?;
        let response = self.inner.execute(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry) = retry_request else {
            return Ok(response);
        };
        drop(response);

        debug!(mcp = %host, "Got 401, attempting token refresh");
        let new_token = self.provider.refresh_token().await?;

        set_bearer(&mut retry, &new_token.access_token)?;
        self.inner.execute(retry).await
    }
}

fn set_bearer(request: &mut reqwest::Request, access_token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
        .map_err(|e| Error::Internal(format!("access token is not header-safe: {e}")))?;
    request.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(())
}
