//! Dynamic client registration (RFC 7591)

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::OAuthConfig;
use crate::{Error, Result};

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Client name sent with registration requests.
const CLIENT_NAME: &str = "mcp-oauth-client";

/// Dynamic client registration request (RFC 7591).
#[derive(Debug, Serialize)]
struct ClientRegistrationRequest {
    redirect_uris: Vec<String>,
    client_name: String,
    /// "none" requests a public client; PKCE replaces the client secret.
    token_endpoint_auth_method: String,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    scope: String,
}

/// Registration response (RFC 7591), including the informational echo
/// fields servers send back.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientRegistrationResponse {
    client_id: String,
    client_secret: String,
    client_id_issued_at: i64,
    client_secret_expires_at: i64,
    registration_access_token: String,
    registration_client_uri: String,
}

/// Registration error body, when the server provides one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistrationErrorResponse {
    error: String,
    error_description: String,
}

/// Credentials obtained from dynamic client registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// Unique identifier for the registered client
    pub client_id: String,
    /// Client secret (empty for public clients)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    /// Token for managing this registration, informational only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registration_access_token: String,
    /// URI for managing this registration, informational only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registration_client_uri: String,
}

/// Register a new OAuth client with the authorization server.
///
/// # Errors
///
/// Returns [`Error::Registration`] when the endpoint or redirect URI is
/// missing, when the server answers with anything but 200/201, or when the
/// response cannot be parsed.
pub async fn register_client(cfg: &OAuthConfig) -> Result<ClientCredentials> {
    if cfg.registration_endpoint.is_empty() {
        return Err(Error::Registration(
            "registration endpoint is required".to_string(),
        ));
    }
    if cfg.redirect_uri.is_empty() {
        return Err(Error::Registration("redirect URI is required".to_string()));
    }

    let request = ClientRegistrationRequest {
        redirect_uris: vec![cfg.redirect_uri.clone()],
        client_name: CLIENT_NAME.to_string(),
        token_endpoint_auth_method: "none".to_string(),
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        scope: cfg.scopes.join(" "),
    };

    debug!(endpoint = %cfg.registration_endpoint, "Registering OAuth client");

    let client = Client::builder().timeout(REGISTRATION_TIMEOUT).build()?;
    let response = client
        .post(&cfg.registration_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| Error::Registration(format!("registration request failed: {e}")))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status != StatusCode::OK && status != StatusCode::CREATED {
        if let Ok(err) = serde_json::from_str::<RegistrationErrorResponse>(&body) {
            if !err.error.is_empty() {
                return Err(Error::Registration(format!(
                    "{} - {}",
                    err.error, err.error_description
                )));
            }
        }
        return Err(Error::Registration(format!(
            "status {status}, body: {body}"
        )));
    }

    let reg: ClientRegistrationResponse = serde_json::from_str(&body)
        .map_err(|e| Error::Registration(format!("failed to parse registration response: {e}")))?;

    if reg.client_secret_expires_at > 0 {
        debug!(
            issued_at = reg.client_id_issued_at,
            expires_at = reg.client_secret_expires_at,
            "Registered client secret has an expiry"
        );
    }

    info!(client_id = %reg.client_id, "OAuth client registered");

    Ok(ClientCredentials {
        client_id: reg.client_id,
        client_secret: reg.client_secret,
        registration_access_token: reg.registration_access_token,
        registration_client_uri: reg.registration_client_uri,
    })
}
