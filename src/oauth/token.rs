//! OAuth tokens and token-endpoint requests
//!
//! Covers both halves of the token endpoint: exchanging an authorization
//! code (with its PKCE verifier) and refreshing with a refresh token.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::OAuthConfig;
use crate::{Error, Result};

/// Timeout for requests against the token endpoint.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An OAuth access token with optional refresh material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Opaque access token
    pub access_token: String,
    /// Refresh token, when the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, as reported at issuance
    #[serde(default)]
    pub expires_in: u64,
    /// Absolute expiry as epoch seconds, computed at issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Token {
    /// Create a token issued now, computing `expires_at` from `expires_in`.
    #[must_use]
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: u64) -> Self {
        let expires_at = (expires_in > 0).then(|| unix_now() + expires_in);
        Self {
            access_token,
            refresh_token,
            expires_in,
            expires_at,
        }
    }

    /// Whether the token has expired. A token without `expires_at` never
    /// expires.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= unix_now(),
            None => false,
        }
    }
}

/// Current time as epoch seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchange an authorization code for an access token.
///
/// # Errors
///
/// Returns [`Error::TokenEndpoint`] on a non-success status, or
/// [`Error::Http`] on a transport failure.
pub async fn exchange_code(cfg: &OAuthConfig, code: &str, verifier: &str) -> Result<Token> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", cfg.redirect_uri.as_str()),
        ("client_id", cfg.client_id.as_str()),
    ];

    if !cfg.client_secret.is_empty() {
        params.push(("client_secret", cfg.client_secret.as_str()));
    }

    // PKCE is mandatory per RFC 7636
    params.push(("code_verifier", verifier));

    token_request(&cfg.token_url, &params).await
}

/// Refresh an expired access token using a refresh token.
///
/// # Errors
///
/// Returns [`Error::TokenEndpoint`] on a non-success status, or
/// [`Error::Http`] on a transport failure.
pub async fn refresh_token(cfg: &OAuthConfig, refresh_token: &str) -> Result<Token> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", cfg.client_id.as_str()),
    ];

    if !cfg.client_secret.is_empty() {
        params.push(("client_secret", cfg.client_secret.as_str()));
    }

    token_request(&cfg.token_url, &params).await
}

async fn token_request(token_url: &str, params: &[(&str, &str)]) -> Result<Token> {
    let client = Client::builder().timeout(TOKEN_REQUEST_TIMEOUT).build()?;

    let response = client
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(params)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(Error::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    let token_response: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| Error::Internal(format!("failed to parse token response: {e}")))?;

    debug!(
        token_type = token_response.token_type.as_deref().unwrap_or("Bearer"),
        scope = token_response.scope.as_deref().unwrap_or_default(),
        expires_in = token_response.expires_in,
        "Token endpoint request succeeded"
    );

    Ok(Token::new(
        token_response.access_token,
        token_response.refresh_token,
        token_response.expires_in,
    ))
}
