//! MCP OAuth Client Library
//!
//! OAuth 2.0 client subsystem for connecting to Model Context Protocol
//! (MCP) servers protected by OAuth.
//!
//! # Features
//!
//! - **Authorization Code flow with PKCE** (RFC 7636, mandatory on every
//!   flow) driven by a short-lived loopback callback server
//! - **Server metadata discovery** (RFC 8414) with graceful fallback to
//!   explicit configuration
//! - **Dynamic client registration** (RFC 7591) for servers that support it
//! - **Persistent token store**: one JSON file holding tokens and client
//!   credentials for every configured server
//! - **Transparent HTTP middleware** that attaches bearer tokens, refreshes
//!   them, and retries once on 401
//!
//! The [`provider::OAuthTokenProvider`] is the hub: HTTP middleware asks it
//! for a valid token, and it falls back from its in-memory cache to the
//! store, to a refresh, and finally to an interactive authorization.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod oauth;
pub mod provider;
pub mod store;
pub mod transport;

pub use error::{Error, Result};
