//! OAuth configuration for an MCP server

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default redirect URI using the default callback port.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:19876/callback";

/// OAuth configuration for a single MCP server.
///
/// Any subset of the fields may be present; missing pieces are filled in by
/// metadata discovery and/or dynamic client registration. An empty string
/// means "not set", mirroring how the values travel on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret (empty for public clients)
    pub client_secret: String,
    /// Authorization endpoint URL
    pub authorization_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Loopback redirect URI for the authorization flow
    pub redirect_uri: String,
    /// Dynamic client registration endpoint (RFC 7591)
    pub registration_endpoint: String,
}

impl OAuthConfig {
    /// Whether dynamic client registration is available.
    #[must_use]
    pub fn supports_dynamic_registration(&self) -> bool {
        !self.registration_endpoint.is_empty()
    }

    /// Validate and normalize the configuration.
    ///
    /// Fills in the default redirect URI when none is set, then checks that
    /// the redirect URI is an http loopback address, that every URL-valued
    /// field parses, and that either a client_id or a registration endpoint
    /// is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when any constraint is violated.
    pub fn validate(&mut self) -> Result<()> {
        if self.redirect_uri.is_empty() {
            self.redirect_uri = DEFAULT_REDIRECT_URI.to_string();
        }

        validate_redirect_uri(&self.redirect_uri)?;

        if !self.authorization_url.is_empty() {
            Url::parse(&self.authorization_url)
                .map_err(|e| Error::Config(format!("invalid authorization_url: {e}")))?;
        }

        if !self.token_url.is_empty() {
            Url::parse(&self.token_url)
                .map_err(|e| Error::Config(format!("invalid token_url: {e}")))?;
        }

        if !self.registration_endpoint.is_empty() {
            Url::parse(&self.registration_endpoint)
                .map_err(|e| Error::Config(format!("invalid registration_endpoint: {e}")))?;
        }

        if self.client_id.is_empty() && self.registration_endpoint.is_empty() {
            return Err(Error::Config(
                "either client_id or registration_endpoint must be set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Check that the URI is usable for the loopback authorization flow.
fn validate_redirect_uri(uri: &str) -> Result<()> {
    let parsed =
        Url::parse(uri).map_err(|e| Error::Config(format!("invalid redirect_uri: {e}")))?;

    if parsed.scheme() != "http" {
        return Err(Error::Config(format!(
            "redirect_uri must use http scheme, got {:?}",
            parsed.scheme()
        )));
    }

    let host = parsed.host_str().unwrap_or_default();
    if host != "localhost" && host != "127.0.0.1" {
        return Err(Error::Config(format!(
            "redirect_uri must be localhost or 127.0.0.1, got {host:?}"
        )));
    }

    Ok(())
}
