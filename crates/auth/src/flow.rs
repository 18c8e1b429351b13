// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive authorization-code flow.
//!
//! A short-lived local HTTP listener receives the provider's redirect,
//! validates the CSRF state, exchanges the code and persists the grant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::AuthSettings;
use crate::discovery::DiscoveryDocument;
use crate::error::AuthError;
use crate::provider::{generate_state, OAuthProvider};
use crate::store::TokenStore;

const SUCCESS_HTML: &str = include_str!("../web/success.html");
const CSRF_HTML: &str = include_str!("../web/csrf.html");
const ERROR_HTML: &str = include_str!("../web/error.html");
const EXPIRED_HTML: &str = include_str!("../web/expired.html");

/// Upper bound on graceful listener shutdown before the task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Opens the consent URL for the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Launches the platform's default browser.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        open::that(url)?;
        Ok(())
    }
}

/// Prints the URL for the user to open by hand.
pub struct PrintBrowser;

impl Browser for PrintBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        eprintln!("Open this URL in a browser to connect QuickBooks:\n\n  {url}\n");
        Ok(())
    }
}

/// Tokens produced by a completed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub tenant_id: String,
    pub expires_in: u64,
}

/// Listener and timing parameters of one flow.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub bind_addr: SocketAddr,
    pub callback_timeout: Option<Duration>,
    pub close_delay: Duration,
    /// How long a callback already being handled at the deadline may take
    /// to finish before it is abandoned.
    pub callback_grace: Duration,
    pub scope: String,
}

impl From<&AuthSettings> for FlowSettings {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            bind_addr: settings.callback_addr,
            callback_timeout: settings.callback_timeout,
            close_delay: settings.close_delay,
            callback_grace: settings.http_timeout,
            scope: settings.scope.clone(),
        }
    }
}

type Outcome = Result<GrantTokens, AuthError>;

/// State shared with the callback handler for one flow.
pub struct CallbackState {
    csrf_state: String,
    provider: OAuthProvider,
    endpoints: DiscoveryDocument,
    store: Arc<TokenStore>,
    /// Taken by the first callback; later callbacks find it empty.
    outcome: Mutex<Option<oneshot::Sender<Outcome>>>,
    /// Cancels a callback still exchanging its code after the flow gave up.
    abandoned: CancellationToken,
}

impl CallbackState {
    pub fn new(
        csrf_state: String,
        provider: OAuthProvider,
        endpoints: DiscoveryDocument,
        store: Arc<TokenStore>,
        outcome: oneshot::Sender<Outcome>,
    ) -> Self {
        Self {
            csrf_state,
            provider,
            endpoints,
            store,
            outcome: Mutex::new(Some(outcome)),
            abandoned: CancellationToken::new(),
        }
    }

    /// Close the flow to callbacks. Returns `false` when a callback has
    /// already claimed the outcome.
    fn close(&self) -> bool {
        self.outcome.lock().take().is_some()
    }

    async fn complete(&self, params: &HashMap<String, String>) -> Outcome {
        let param = |name: &str| params.get(name).map(String::as_str).filter(|v| !v.is_empty());

        if let Some(error) = param("error") {
            let detail = param("error_description").map(|d| format!(": {d}")).unwrap_or_default();
            return Err(AuthError::Exchange(format!("authorization denied ({error}){detail}")));
        }
        let code = param("code")
            .ok_or_else(|| AuthError::Exchange("callback is missing the authorization code".into()))?;
        let tenant_id = param("realmId")
            .ok_or_else(|| AuthError::Exchange("callback is missing realmId".into()))?;

        let token = self.provider.exchange_code(&self.endpoints, code).await?;
        let refresh_token = token
            .refresh_token
            .ok_or_else(|| AuthError::Exchange("token response has no refresh token".into()))?;

        self.store.save(Some(&refresh_token), Some(tenant_id))?;

        Ok(GrantTokens {
            access_token: token.access_token,
            refresh_token,
            tenant_id: tenant_id.to_owned(),
            expires_in: token.expires_in,
        })
    }
}

async fn callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let Some(outcome) = state.outcome.lock().take() else {
        return (StatusCode::GONE, Html(EXPIRED_HTML));
    };

    if params.get("state").map(String::as_str) != Some(state.csrf_state.as_str()) {
        warn!("authorization callback rejected: CSRF state mismatch");
        let _ = outcome.send(Err(AuthError::CsrfMismatch));
        return (StatusCode::FORBIDDEN, Html(CSRF_HTML));
    }

    // Dropping `complete` mid-exchange happens before anything is persisted,
    // and the dropped sender tells the flow nothing was adopted.
    let completed = tokio::select! {
        biased;
        () = state.abandoned.cancelled() => None,
        outcome = state.complete(&params) => Some(outcome),
    };
    let Some(completed) = completed else {
        warn!("authorization callback abandoned after the deadline");
        return (StatusCode::REQUEST_TIMEOUT, Html(EXPIRED_HTML));
    };

    match completed {
        Ok(grant) => {
            info!(tenant = %grant.tenant_id, "QuickBooks authorization complete");
            let _ = outcome.send(Ok(grant));
            (StatusCode::OK, Html(SUCCESS_HTML))
        }
        Err(e) => {
            warn!(err = %e, "authorization callback failed");
            let _ = outcome.send(Err(e));
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_HTML))
        }
    }
}

/// Router serving `GET /callback` for one flow.
pub fn build_callback_router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/callback", get(callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One run of the browser authorization.
pub struct AuthorizationFlow {
    provider: OAuthProvider,
    endpoints: DiscoveryDocument,
    store: Arc<TokenStore>,
    browser: Arc<dyn Browser>,
    settings: FlowSettings,
}

impl AuthorizationFlow {
    pub fn new(
        provider: OAuthProvider,
        endpoints: DiscoveryDocument,
        store: Arc<TokenStore>,
        browser: Arc<dyn Browser>,
        settings: FlowSettings,
    ) -> Self {
        Self { provider, endpoints, store, browser, settings }
    }

    /// Drive the flow to a terminal outcome. The listener is closed on every
    /// outcome before this returns.
    pub async fn run(self) -> Result<GrantTokens, AuthError> {
        let csrf_state = generate_state();
        let auth_url =
            self.provider.authorization_url(&self.endpoints, &self.settings.scope, &csrf_state)?;

        let addr = self.settings.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::Listener(format!("bind {addr}: {e}")))?;

        let (tx, mut rx) = oneshot::channel();
        let callback_state = Arc::new(CallbackState::new(
            csrf_state,
            self.provider.clone(),
            self.endpoints.clone(),
            Arc::clone(&self.store),
            tx,
        ));
        let router = build_callback_router(Arc::clone(&callback_state));

        let shutdown = CancellationToken::new();
        let mut server = {
            let sd = shutdown.clone();
            tokio::spawn(async move {
                axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await
            })
        };

        info!(%addr, "waiting for QuickBooks authorization callback");
        if let Err(e) = self.browser.open(&auth_url) {
            warn!(err = %e, url = %auth_url, "could not open a browser; open the URL manually");
        }

        let deadline = async {
            match self.settings.callback_timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        let mut server_done = false;
        let outcome = tokio::select! {
            received = &mut rx => {
                let outcome = received.unwrap_or_else(|_| {
                    Err(AuthError::Listener("callback handler dropped".into()))
                });
                // Let the browser receive the response page before closing.
                tokio::time::sleep(self.settings.close_delay).await;
                outcome
            }
            exited = &mut server => {
                server_done = true;
                let reason = match exited {
                    Ok(Ok(())) => "listener stopped".to_owned(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                Err(AuthError::Listener(reason))
            }
            () = deadline => {
                let after = self.settings.callback_timeout.unwrap_or_default();
                self.settle_after_deadline(&callback_state, rx, after).await
            }
        };

        shutdown.cancel();
        if !server_done && tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            server.abort();
        }
        debug!(%addr, "callback listener closed");

        outcome
    }

    /// Resolve the flow once its deadline passed. A callback that arrived in
    /// time and is still exchanging its code gets `callback_grace` to finish,
    /// so a grant it persists is also the grant returned.
    async fn settle_after_deadline(
        &self,
        callback_state: &CallbackState,
        mut rx: oneshot::Receiver<Outcome>,
        after: Duration,
    ) -> Outcome {
        if callback_state.close() {
            return Err(AuthError::AuthorizationTimeout(after));
        }
        debug!("deadline reached with a callback in progress; waiting for it");
        if let Ok(received) = tokio::time::timeout(self.settings.callback_grace, &mut rx).await {
            return received.unwrap_or(Err(AuthError::AuthorizationTimeout(after)));
        }
        callback_state.abandoned.cancel();
        rx.await.unwrap_or(Err(AuthError::AuthorizationTimeout(after)))
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
