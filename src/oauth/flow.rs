//! Authorization-code flow orchestrator
//!
//! Drives the whole interactive flow: PKCE material, loopback callback
//! server, authorization URL, browser hand-off, callback wait, and the final
//! code-for-token exchange.

use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use super::callback::CallbackServer;
use super::config::OAuthConfig;
use super::pkce::{generate_pkce, generate_state};
use super::token::{exchange_code, Token};
use crate::{Error, Result};

/// Default timeout for the complete authorization flow.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Options for [`start_auth_flow`].
pub struct AuthFlowOptions {
    /// Deadline for the entire flow, callback wait and token exchange
    /// included.
    pub timeout: Duration,
    /// Whether to launch the system browser on the authorization URL.
    pub open_browser: bool,
    /// Invoked with the assembled authorization URL before any browser
    /// launch, so the host can display it regardless.
    pub on_auth_url: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Default for AuthFlowOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_AUTH_TIMEOUT,
            open_browser: true,
            on_auth_url: None,
        }
    }
}

/// Run the complete OAuth authorization flow.
///
/// Starts a loopback callback server, hands the authorization URL to the
/// user, waits for the redirect, verifies the CSRF state, and exchanges the
/// authorization code for tokens. The server is bound before the URL is
/// assembled so the redirect URI carries the actual port.
///
/// Dropping the returned future tears the callback server down.
///
/// # Errors
///
/// Returns [`Error::AuthFlow`] on timeout, callback errors, or a state
/// mismatch; [`Error::TokenEndpoint`] when the exchange fails.
pub async fn start_auth_flow(cfg: OAuthConfig, opts: AuthFlowOptions) -> Result<Token> {
    let timeout = opts.timeout;
    match tokio::time::timeout(timeout, run_auth_flow(cfg, opts)).await {
        Ok(result) => result,
        Err(_) => Err(Error::AuthFlow(format!(
            "timed out after {}s waiting for authorization",
            timeout.as_secs()
        ))),
    }
}

async fn run_auth_flow(mut cfg: OAuthConfig, opts: AuthFlowOptions) -> Result<Token> {
    // PKCE is mandatory per RFC 7636
    let (verifier, challenge) = generate_pkce();
    let state = generate_state();

    let (port, path) = parse_redirect_uri(&cfg.redirect_uri)?;

    let mut server = CallbackServer::bind(port, &path).await?;

    // The server's URI carries the actual port when the OS picked one; both
    // the authorize request and the token exchange must use it.
    cfg.redirect_uri = server.redirect_uri();

    let auth_url = authorize_url(&cfg, &state, &challenge)?;

    info!(redirect_uri = %cfg.redirect_uri, "OAuth authorization required");

    if let Some(on_auth_url) = &opts.on_auth_url {
        on_auth_url(&auth_url);
    }

    if opts.open_browser {
        if let Err(e) = open::that(&auth_url) {
            // Not fatal: the user can still open the URL manually.
            warn!(error = %e, "Failed to open browser automatically");
        }
    }

    let result = server.wait_for_callback().await?;

    if !result.error.is_empty() {
        return Err(Error::AuthFlow(result.error));
    }

    if result.state != state {
        return Err(Error::AuthFlow("state mismatch in callback".to_string()));
    }

    let token = exchange_code(&cfg, &result.code, &verifier).await?;

    server.close().await;

    info!("OAuth authorization successful");
    Ok(token)
}

/// Build the authorization URL with PKCE challenge and CSRF state.
///
/// # Errors
///
/// Returns [`Error::Config`] when the configured authorization URL does not
/// parse.
pub fn authorize_url(cfg: &OAuthConfig, state: &str, challenge: &str) -> Result<String> {
    let mut url = Url::parse(&cfg.authorization_url)
        .map_err(|e| Error::Config(format!("invalid authorization_url: {e}")))?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &cfg.client_id);
        params.append_pair("redirect_uri", &cfg.redirect_uri);
        params.append_pair("state", state);

        if !cfg.scopes.is_empty() {
            params.append_pair("scope", &cfg.scopes.join(" "));
        }

        // PKCE is mandatory per RFC 7636
        params.append_pair("code_challenge", challenge);
        params.append_pair("code_challenge_method", "S256");
    }

    Ok(url.into())
}

/// Split a validated redirect URI into port and path. A missing port means
/// "let the OS pick one"; a missing path defaults to `/callback`.
fn parse_redirect_uri(redirect_uri: &str) -> Result<(u16, String)> {
    let url = Url::parse(redirect_uri)
        .map_err(|e| Error::Config(format!("invalid redirect_uri: {e}")))?;

    let port = url.port().unwrap_or(0);
    let path = match url.path() {
        "" | "/" => "/callback".to_string(),
        path => path.to_string(),
    };

    Ok((port, path))
}
