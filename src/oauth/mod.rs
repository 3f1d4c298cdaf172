//! OAuth 2.0 client for MCP servers
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) for MCP
//! servers that require authentication.
//!
//! Features:
//! - Authorization server metadata discovery (RFC 8414)
//! - Dynamic client registration (RFC 7591)
//! - Authorization code flow with mandatory PKCE
//! - Loopback callback server for auth code reception
//! - Token exchange and refresh

mod callback;
mod config;
mod discovery;
mod flow;
mod pkce;
mod register;
mod token;

pub use config::{OAuthConfig, DEFAULT_REDIRECT_URI};
pub use discovery::discover;
pub use flow::{authorize_url, start_auth_flow, AuthFlowOptions, DEFAULT_AUTH_TIMEOUT};
pub use pkce::{generate_pkce, generate_state};
pub use register::{register_client, ClientCredentials};
pub use token::{exchange_code, refresh_token, Token};
