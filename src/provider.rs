//! Token provider
//!
//! One provider per MCP server, shared by every request to that server. It
//! owns the working copy of the OAuth configuration and the cached token,
//! and resolves tokens in order: cache, store (refreshing when possible),
//! and finally the installed interactive authorize callback.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::oauth::{self, OAuthConfig, Token};
use crate::store::TokenStore;
use crate::{Error, Result};

/// Interactive authorize callback. Invoked with the provider's working
/// config when no stored or refreshable token is available; the host
/// typically drives [`crate::oauth::start_auth_flow`] here.
pub type AuthFn = Arc<dyn Fn(OAuthConfig) -> BoxFuture<'static, Result<Token>> + Send + Sync>;

/// Source of valid OAuth tokens for one MCP server.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a valid token, loading from cache, refreshing, or triggering
    /// authorization as needed. Acquired tokens are persisted to storage.
    async fn ensure_token(&self) -> Result<Token>;

    /// Force a refresh using the current refresh token.
    async fn refresh_token(&self) -> Result<Token>;
}

/// State guarded by the provider mutex: the working config (mutated when
/// client credentials are loaded or registered) and the cached token.
struct ProviderState {
    config: OAuthConfig,
    token: Option<Token>,
}

/// [`TokenProvider`] backed by the persistent [`TokenStore`].
pub struct OAuthTokenProvider {
    name: String,
    store: Arc<TokenStore>,
    auth_fn: Mutex<Option<AuthFn>>,
    state: tokio::sync::Mutex<ProviderState>,
}

impl OAuthTokenProvider {
    /// Create a provider for an MCP server. Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the OAuth configuration is invalid.
    pub fn new(name: impl Into<String>, mut config: OAuthConfig, store: Arc<TokenStore>) -> Result<Self> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| Error::Config(format!("invalid OAuth config for MCP {name:?}: {e}")))?;

        Ok(Self {
            name,
            store,
            auth_fn: Mutex::new(None),
            state: tokio::sync::Mutex::new(ProviderState {
                config,
                token: None,
            }),
        })
    }

    /// Install the authorize callback. This is the only path to an
    /// interactive flow; without it, `ensure_token` fails once cache, store
    /// and refresh are exhausted.
    pub fn set_auth_func<F>(&self, auth_fn: F)
    where
        F: Fn(OAuthConfig) -> BoxFuture<'static, Result<Token>> + Send + Sync + 'static,
    {
        *self.auth_fn.lock() = Some(Arc::new(auth_fn));
    }

    /// Make sure the working config carries a client_id: keep the configured
    /// one, fall back to stored credentials, and finally register
    /// dynamically when the server supports it.
    async fn ensure_client_registration(&self, state: &mut ProviderState) -> Result<()> {
        if !state.config.client_id.is_empty() {
            return Ok(());
        }

        let stored = self.store.load(&self.name)?;
        if let Some(entry) = &stored {
            if let Some(client_id) = entry.client_id.clone().filter(|id| !id.is_empty()) {
                state.config.client_secret = entry.client_secret.clone().unwrap_or_default();
                debug!(mcp = %self.name, client_id = %client_id, "Loaded stored client credentials");
                state.config.client_id = client_id;
                return Ok(());
            }
        }

        if !state.config.supports_dynamic_registration() {
            return Err(Error::Config(format!(
                "no client_id configured and dynamic registration not supported for MCP {:?}",
                self.name
            )));
        }

        info!(mcp = %self.name, "Registering OAuth client dynamically");
        let creds = oauth::register_client(&state.config).await?;

        // Merge the credentials over any existing token fields.
        let mut entry = stored.unwrap_or_default();
        entry.apply_credentials(&creds);
        if let Err(e) = self.store.save(&self.name, &entry) {
            warn!(mcp = %self.name, error = %e, "Failed to save client credentials");
        }

        state.config.client_id = creds.client_id.clone();
        state.config.client_secret = creds.client_secret.clone();
        info!(mcp = %self.name, client_id = %creds.client_id, "OAuth client registered");

        Ok(())
    }

    /// Try the store: adopt an unexpired token, or refresh an expired one
    /// when a refresh token is present. Returns `None` when the store has
    /// nothing usable; failures along the way degrade to `None` so the
    /// caller can fall through to interactive authorization.
    async fn load_or_refresh_stored(&self, state: &mut ProviderState) -> Option<Token> {
        let entry = match self.store.load(&self.name) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                debug!(mcp = %self.name, error = %e, "Failed to load stored OAuth data");
                return None;
            }
        };
        let stored = entry.token()?;

        if !stored.is_expired() {
            state.token = Some(stored.clone());
            return Some(stored);
        }

        let refresh = stored.refresh_token.clone()?;

        if let Err(e) = self.ensure_client_registration(state).await {
            debug!(mcp = %self.name, error = %e, "Failed to ensure client registration for refresh");
            return None;
        }

        let new_token = match oauth::refresh_token(&state.config, &refresh).await {
            Ok(token) => token,
            Err(e) => {
                debug!(mcp = %self.name, error = %e, "Failed to refresh stored token");
                return None;
            }
        };

        state.token = Some(new_token.clone());
        if let Err(e) = self.save_token(&new_token) {
            warn!(mcp = %self.name, error = %e, "Failed to save refreshed token");
        }
        Some(new_token)
    }

    /// Persist a token, preserving stored client credentials.
    fn save_token(&self, token: &Token) -> Result<()> {
        let mut entry = self.store.load(&self.name).ok().flatten().unwrap_or_default();
        entry.apply_token(token);
        self.store.save(&self.name, &entry)
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn ensure_token(&self) -> Result<Token> {
        let mut state = self.state.lock().await;

        if let Some(token) = &state.token {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        if let Some(token) = self.load_or_refresh_stored(&mut state).await {
            return Ok(token);
        }

        let auth_fn = self.auth_fn.lock().clone();
        let Some(auth_fn) = auth_fn else {
            return Err(Error::AuthFlow(format!(
                "no valid token available and no auth function configured for MCP {:?}",
                self.name
            )));
        };

        // The authorize URL must carry a client_id, so registration comes
        // first.
        self.ensure_client_registration(&mut state).await?;

        let token = auth_fn(state.config.clone()).await?;

        state.token = Some(token.clone());
        if let Err(e) = self.save_token(&token) {
            warn!(mcp = %self.name, error = %e, "Failed to save token");
        }
        Ok(token)
    }

    async fn refresh_token(&self) -> Result<Token> {
        let mut state = self.state.lock().await;

        self.ensure_client_registration(&mut state).await?;

        let refresh = state
            .token
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .or_else(|| {
                self.store
                    .load(&self.name)
                    .ok()
                    .flatten()
                    .and_then(|entry| entry.refresh_token)
                    .filter(|r| !r.is_empty())
            });

        let Some(refresh) = refresh else {
            return Err(Error::AuthFlow(format!(
                "no refresh token available for MCP {:?}",
                self.name
            )));
        };

        let new_token = oauth::refresh_token(&state.config, &refresh).await?;

        state.token = Some(new_token.clone());
        if let Err(e) = self.save_token(&new_token) {
            warn!(mcp = %self.name, error = %e, "Failed to save refreshed token");
        }
        Ok(new_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredEntry;

    fn valid_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "test-client-id".to_string(),
            authorization_url: "https://example.com/auth".to_string(),
            token_url: "https://example.com/token".to_string(),
            ..Default::default()
        }
    }

    fn valid_token() -> Token {
        Token::new(
            "valid-access-token".to_string(),
            Some("valid-refresh-token".to_string()),
            3600,
        )
    }

    fn expired_token_no_refresh() -> StoredEntry {
        StoredEntry {
            access_token: Some("expired-access-token".to_string()),
            expires_in: Some(3600),
            expires_at: Some(1),
            ..Default::default()
        }
    }

    fn test_store() -> (tempfile::TempDir, Arc<TokenStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path().join("mcp.json")));
        (dir, store)
    }

    #[test]
    fn new_validates_config() {
        let (_dir, store) = test_store();
        assert!(OAuthTokenProvider::new("test", OAuthConfig::default(), store).is_err());
    }

    #[tokio::test]
    async fn returns_cached_valid_token() {
        let (_dir, store) = test_store();
        let provider = OAuthTokenProvider::new("test", valid_config(), store).unwrap();

        let cached = valid_token();
        provider.state.lock().await.token = Some(cached.clone());

        let token = provider.ensure_token().await.unwrap();
        assert_eq!(token, cached);
    }

    #[tokio::test]
    async fn loads_valid_token_from_store() {
        let (_dir, store) = test_store();
        let mut entry = StoredEntry::default();
        entry.apply_token(&valid_token());
        store.save("test", &entry).unwrap();

        let provider = OAuthTokenProvider::new("test", valid_config(), store).unwrap();
        let token = provider.ensure_token().await.unwrap();
        assert_eq!(token.access_token, "valid-access-token");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn uses_auth_fn_when_no_valid_token() {
        let (_dir, store) = test_store();
        let provider = OAuthTokenProvider::new("test", valid_config(), Arc::clone(&store)).unwrap();

        provider.set_auth_func(|_cfg| {
            Box::pin(async {
                Ok(Token::new(
                    "new-auth-token".to_string(),
                    Some("new-refresh".to_string()),
                    3600,
                ))
            })
        });

        let token = provider.ensure_token().await.unwrap();
        assert_eq!(token.access_token, "new-auth-token");

        // The token is persisted
        let entry = store.load("test").unwrap().unwrap();
        assert_eq!(entry.access_token.as_deref(), Some("new-auth-token"));
    }

    #[tokio::test]
    async fn fails_without_token_and_auth_fn() {
        let (_dir, store) = test_store();
        let provider = OAuthTokenProvider::new("test", valid_config(), store).unwrap();

        let err = provider.ensure_token().await.unwrap_err();
        assert!(err.to_string().contains("no valid token available"));
    }

    #[tokio::test]
    async fn expired_store_entry_without_refresh_falls_back_to_auth_fn() {
        let (_dir, store) = test_store();
        store.save("test", &expired_token_no_refresh()).unwrap();

        let provider = OAuthTokenProvider::new("test", valid_config(), Arc::clone(&store)).unwrap();
        provider.set_auth_func(|_cfg| {
            Box::pin(async { Ok(Token::new("fresh-from-auth".to_string(), None, 3600)) })
        });

        let token = provider.ensure_token().await.unwrap();
        assert_eq!(token.access_token, "fresh-from-auth");

        // The fresh token replaced the store entry
        let entry = store.load("test").unwrap().unwrap();
        assert_eq!(entry.access_token.as_deref(), Some("fresh-from-auth"));
    }

    #[tokio::test]
    async fn cached_token_wins_over_store_changes() {
        let (_dir, store) = test_store();
        let mut entry = StoredEntry::default();
        entry.apply_token(&valid_token());
        store.save("test", &entry).unwrap();

        let provider = OAuthTokenProvider::new("test", valid_config(), Arc::clone(&store)).unwrap();
        let first = provider.ensure_token().await.unwrap();

        let mut other = StoredEntry::default();
        other.apply_token(&Token::new("different-token".to_string(), None, 3600));
        store.save("test", &other).unwrap();

        let second = provider.ensure_token().await.unwrap();
        assert_eq!(second.access_token, first.access_token);
    }

    #[tokio::test]
    async fn auth_fn_invoked_once_then_cached() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_dir, store) = test_store();
        let provider = OAuthTokenProvider::new("test", valid_config(), store).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        provider.set_auth_func(move |_cfg| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Token::new("once".to_string(), None, 3600)) })
        });

        provider.ensure_token().await.unwrap();
        provider.ensure_token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_errors_without_refresh_token() {
        let (_dir, store) = test_store();
        let provider = OAuthTokenProvider::new("test", valid_config(), store).unwrap();

        let err = provider.refresh_token().await.unwrap_err();
        assert!(err.to_string().contains("no refresh token available"));
    }
}
