//! Loopback callback server
//!
//! A short-lived HTTP server that receives the OAuth redirect after the user
//! authorizes in the browser. It serves exactly one path and delivers
//! exactly one result, no matter how many requests arrive (browsers retry,
//! fetch favicons, reload).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Error, Result};

/// Grace period for the server to finish in-flight responses on close.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Parsed outcome of an OAuth callback. Exactly one of `code` or `error` is
/// non-empty on a well-formed callback.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallbackResult {
    /// Authorization code
    pub code: String,
    /// State parameter echoed by the authorization server
    pub state: String,
    /// Error reported by the authorization server, with its description
    pub error: String,
}

/// Query parameters the authorization server may redirect with.
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Deliver-once gate in front of the result channel.
struct Latch {
    tx: Mutex<Option<oneshot::Sender<CallbackResult>>>,
}

impl Latch {
    fn deliver(&self, result: CallbackResult) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// A running loopback callback server.
pub(crate) struct CallbackServer {
    port: u16,
    path: String,
    result_rx: Option<oneshot::Receiver<CallbackResult>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `localhost:<port>` and start serving `path`.
    ///
    /// A port of 0 lets the OS pick one; the bound port is reflected in
    /// [`CallbackServer::redirect_uri`]. An empty path defaults to
    /// `/callback`.
    pub(crate) async fn bind(port: u16, path: &str) -> Result<Self> {
        let path = if path.is_empty() { "/callback" } else { path };

        let listener = TcpListener::bind(("localhost", port))
            .await
            .map_err(|e| Error::AuthFlow(format!("failed to start callback server: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::AuthFlow(format!("failed to resolve callback address: {e}")))?
            .port();

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let latch = Arc::new(Latch {
            tx: Mutex::new(Some(result_tx)),
        });

        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(Arc::clone(&latch));

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                latch.deliver(CallbackResult {
                    error: format!("callback server error: {e}"),
                    ..Default::default()
                });
            }
        });

        let server = Self {
            port,
            path: path.to_string(),
            result_rx: Some(result_rx),
            shutdown_tx: Some(shutdown_tx),
            handle,
        };

        info!(url = %server.redirect_uri(), "OAuth callback server listening");
        Ok(server)
    }

    /// The redirect URI the authorization server should send the user to.
    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.path)
    }

    /// Wait for the single callback result.
    pub(crate) async fn wait_for_callback(&mut self) -> Result<CallbackResult> {
        debug!("Waiting for OAuth callback");
        let rx = self
            .result_rx
            .take()
            .ok_or_else(|| Error::Internal("callback already awaited".to_string()))?;
        rx.await
            .map_err(|_| Error::AuthFlow("callback channel closed unexpectedly".to_string()))
    }

    /// Gracefully shut the server down, waiting up to 5 s for it to finish.
    pub(crate) async fn close(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        // Cancellation path: tell the server task to stop; it finishes on
        // its own inside the runtime.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_callback(
    State(latch): State<Arc<Latch>>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        let message = match params.error_description.filter(|d| !d.is_empty()) {
            Some(desc) => format!("{error}: {desc}"),
            None => error,
        };
        latch.deliver(CallbackResult {
            error: message.clone(),
            ..Default::default()
        });
        return Html(error_page(&message));
    }

    let code = params.code.unwrap_or_default();
    if code.is_empty() {
        latch.deliver(CallbackResult {
            error: "no authorization code received".to_string(),
            ..Default::default()
        });
        return Html(error_page("No authorization code received"));
    }

    latch.deliver(CallbackResult {
        code,
        state: params.state.unwrap_or_default(),
        error: String::new(),
    });
    Html(success_page())
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body { font-family: system-ui, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }
        .container { text-align: center; padding: 2rem; }
        .check { font-size: 4rem; color: #4ade80; }
        h1 { margin: 1rem 0; }
        p { color: #aaa; }
    </style>
</head>
<body>
    <div class="container">
        <div class="check">&#10003;</div>
        <h1>Authorization Successful</h1>
        <p>You can close this window and return to the application.</p>
    </div>
</body>
</html>"#
        .to_string()
}

fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{ font-family: system-ui, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }}
        .container {{ text-align: center; padding: 2rem; }}
        .cross {{ font-size: 4rem; color: #f87171; }}
        h1 {{ margin: 1rem 0; }}
        p {{ color: #aaa; }}
        .msg {{ color: #f87171; margin-top: 1rem; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="cross">&#10007;</div>
        <h1>Authorization Failed</h1>
        <p class="msg">{message}</p>
        <p>Please close this window and try again.</p>
    </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_os_chosen_port_and_reports_it() {
        let server = CallbackServer::bind(0, "/callback").await.unwrap();
        let uri = server.redirect_uri();
        assert!(uri.starts_with("http://localhost:"));
        assert!(uri.ends_with("/callback"));
        assert_ne!(server.port, 0);
        server.close().await;
    }

    #[tokio::test]
    async fn empty_path_defaults_to_callback() {
        let server = CallbackServer::bind(0, "").await.unwrap();
        assert!(server.redirect_uri().ends_with("/callback"));
        server.close().await;
    }

    #[tokio::test]
    async fn delivers_code_and_state() {
        let mut server = CallbackServer::bind(0, "/callback").await.unwrap();
        let uri = server.redirect_uri();

        let body = reqwest::get(format!("{uri}?code=abc&state=xyz"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Authorization Successful"));

        let result = server.wait_for_callback().await.unwrap();
        assert_eq!(result.code, "abc");
        assert_eq!(result.state, "xyz");
        assert!(result.error.is_empty());
        server.close().await;
    }

    #[tokio::test]
    async fn delivers_error_with_description() {
        let mut server = CallbackServer::bind(0, "/callback").await.unwrap();
        let uri = server.redirect_uri();

        let body = reqwest::get(format!(
            "{uri}?error=access_denied&error_description=user%20said%20no"
        ))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
        assert!(body.contains("Authorization Failed"));

        let result = server.wait_for_callback().await.unwrap();
        assert!(result.code.is_empty());
        assert_eq!(result.error, "access_denied: user said no");
        server.close().await;
    }

    #[tokio::test]
    async fn missing_code_delivers_error() {
        let mut server = CallbackServer::bind(0, "/callback").await.unwrap();
        let uri = server.redirect_uri();

        reqwest::get(format!("{uri}?state=xyz")).await.unwrap();

        let result = server.wait_for_callback().await.unwrap();
        assert_eq!(result.error, "no authorization code received");
        server.close().await;
    }

    #[tokio::test]
    async fn only_first_request_is_delivered() {
        let mut server = CallbackServer::bind(0, "/callback").await.unwrap();
        let uri = server.redirect_uri();

        reqwest::get(format!("{uri}?code=first&state=s1"))
            .await
            .unwrap();
        reqwest::get(format!("{uri}?code=second&state=s2"))
            .await
            .unwrap();

        let result = server.wait_for_callback().await.unwrap();
        assert_eq!(result.code, "first");
        server.close().await;
    }

    #[tokio::test]
    async fn serves_configured_path_only() {
        let server = CallbackServer::bind(0, "/oauth/cb").await.unwrap();
        let base = format!("http://localhost:{}", server.port);

        let resp = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        server.close().await;
    }
}
