//! OAuth authorization server metadata discovery (RFC 8414)

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};
use url::Url;

use super::config::OAuthConfig;
use crate::{Error, Result};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Authorization server metadata document (RFC 8414).
#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    authorization_endpoint: String,
    #[serde(default)]
    token_endpoint: String,
    #[serde(default)]
    registration_endpoint: String,
    #[serde(default, deserialize_with = "deserialize_scopes")]
    scopes_supported: Vec<String>,
    #[serde(default)]
    response_types_supported: Vec<String>,
}

/// Deserialize scopes that may be either an array or a space-separated
/// string. Some server implementations return `"read write"` instead of
/// `["read", "write"]`.
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Attempt to discover OAuth configuration from the server's well-known
/// endpoint.
///
/// Returns `Ok(None)` when the server does not support discovery: any
/// network failure, non-200 status, unparseable body, or metadata that fails
/// validation. Callers fall through to explicit configuration in that case.
///
/// # Errors
///
/// Returns [`Error::Config`] only when `server_url` itself cannot be parsed.
pub async fn discover(server_url: &str) -> Result<Option<OAuthConfig>> {
    info!(url = %server_url, "Discovering OAuth 2.0 configuration");

    let parsed =
        Url::parse(server_url).map_err(|e| Error::Config(format!("invalid server URL: {e}")))?;
    let origin = url_origin(&parsed);

    let well_known_url = format!("{origin}/.well-known/oauth-authorization-server");

    let client = Client::builder().timeout(DISCOVERY_TIMEOUT).build()?;
    let response = match client
        .get(&well_known_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            debug!(error = %e, "OAuth discovery request failed");
            return Ok(None);
        }
    };

    if response.status() != StatusCode::OK {
        debug!(status = %response.status(), url = %well_known_url, "OAuth discovery returned non-OK status");
        return Ok(None);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Failed to read discovery response");
            return Ok(None);
        }
    };

    let discovery: DiscoveryResponse = match serde_json::from_str(&body) {
        Ok(d) => d,
        Err(e) => {
            debug!(error = %e, "Failed to parse OAuth metadata");
            return Ok(None);
        }
    };

    if let Err(reason) = validate_discovery(&discovery, &origin) {
        debug!(reason = %reason, "OAuth metadata validation failed");
        return Ok(None);
    }

    info!(issuer = %discovery.issuer, "Discovered OAuth metadata");

    Ok(Some(OAuthConfig {
        authorization_url: discovery.authorization_endpoint,
        token_url: discovery.token_endpoint,
        scopes: discovery.scopes_supported,
        registration_endpoint: discovery.registration_endpoint,
        ..Default::default()
    }))
}

/// Validate the discovery document per RFC 8414.
///
/// The issuer must begin with `scheme://host[:port]` of the URL discovery
/// was performed against. Prefix comparison (rather than equality) admits
/// legitimate multi-tenant issuers that carry a path, while still rejecting
/// a different host.
fn validate_discovery(resp: &DiscoveryResponse, expected_origin: &str) -> std::result::Result<(), String> {
    if resp.issuer.is_empty() {
        return Err("missing required issuer field".to_string());
    }
    if resp.authorization_endpoint.is_empty() {
        return Err("missing required authorization_endpoint field".to_string());
    }
    if resp.token_endpoint.is_empty() {
        return Err("missing required token_endpoint field".to_string());
    }
    if resp.response_types_supported.is_empty() {
        return Err("missing required response_types_supported field".to_string());
    }

    if !resp.issuer.starts_with(expected_origin) {
        return Err(format!(
            "issuer {:?} does not match expected host {expected_origin:?}",
            resp.issuer
        ));
    }

    Ok(())
}

/// Extract `scheme://host[:port]` from a parsed URL.
fn url_origin(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        use std::fmt::Write as _;
        let _ = write!(origin, ":{port}");
    }
    origin
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_response() -> DiscoveryResponse {
        serde_json::from_str(
            r#"{
                "issuer": "https://auth.example.com",
                "authorization_endpoint": "https://auth.example.com/authorize",
                "token_endpoint": "https://auth.example.com/token",
                "response_types_supported": ["code"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn validate_accepts_complete_metadata() {
        let resp = valid_response();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_ok());
    }

    #[test]
    fn validate_accepts_issuer_with_path() {
        let mut resp = valid_response();
        resp.issuer = "https://auth.example.com/tenants/acme".to_string();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_ok());
    }

    #[test]
    fn validate_rejects_issuer_host_mismatch() {
        let resp = valid_response();
        assert!(validate_discovery(&resp, "https://other.example.com").is_err());
    }

    #[test]
    fn validate_rejects_missing_required_fields() {
        let mut resp = valid_response();
        resp.issuer = String::new();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_err());

        let mut resp = valid_response();
        resp.authorization_endpoint = String::new();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_err());

        let mut resp = valid_response();
        resp.token_endpoint = String::new();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_err());

        let mut resp = valid_response();
        resp.response_types_supported.clear();
        assert!(validate_discovery(&resp, "https://auth.example.com").is_err());
    }

    #[test]
    fn scopes_accept_array_or_string() {
        let json = r#"{
            "issuer": "https://a.example.com",
            "authorization_endpoint": "https://a.example.com/authorize",
            "token_endpoint": "https://a.example.com/token",
            "response_types_supported": ["code"],
            "scopes_supported": "read write"
        }"#;
        let resp: DiscoveryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.scopes_supported, vec!["read", "write"]);

        let json = json.replace("\"read write\"", "[\"read\", \"write\"]");
        let resp: DiscoveryResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp.scopes_supported, vec!["read", "write"]);
    }

    #[test]
    fn url_origin_preserves_port() {
        let url = Url::parse("http://127.0.0.1:3000/mcp/endpoint").unwrap();
        assert_eq!(url_origin(&url), "http://127.0.0.1:3000");

        let url = Url::parse("https://example.com/path").unwrap();
        assert_eq!(url_origin(&url), "https://example.com");
    }
}
