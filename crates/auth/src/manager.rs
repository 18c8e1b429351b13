// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle facade: cache, refresh, re-authorization and disconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AuthSettings, ClientCredentials, Environment};
use crate::discovery::DiscoveryResolver;
use crate::error::AuthError;
use crate::flow::{AuthorizationFlow, Browser, FlowSettings, GrantTokens};
use crate::provider::{http_client, OAuthProvider};
use crate::single_flight::SingleFlight;
use crate::state::TokenState;
use crate::store::{PersistedTokens, TokenStore};

/// Ready-to-use credentials for the accounting API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiHandle {
    access_token: String,
    tenant_id: String,
    environment: Environment,
}

impl ApiHandle {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The QuickBooks company (realm) id.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_sandbox(&self) -> bool {
        self.environment.is_sandbox()
    }

    pub fn api_base_url(&self) -> &'static str {
        self.environment.api_base_url()
    }
}

impl std::fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHandle")
            .field("access_token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("environment", &self.environment)
            .finish()
    }
}

/// Access token returned by a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: u64,
}

impl From<&GrantTokens> for RefreshedToken {
    fn from(grant: &GrantTokens) -> Self {
        Self { access_token: grant.access_token.clone(), expires_in: grant.expires_in }
    }
}

/// Keeps one QuickBooks connection authenticated.
///
/// Token state is guarded by an async mutex that refresh holds across its
/// retry loop. The mutex is never held while the interactive authorization
/// runs; that flow is shared by all concurrent callers.
pub struct TokenManager {
    credentials: Arc<ClientCredentials>,
    settings: AuthSettings,
    store: Arc<TokenStore>,
    browser: Arc<dyn Browser>,
    provider: OAuthProvider,
    discovery: DiscoveryResolver,
    state: Mutex<TokenState>,
    handle: RwLock<Option<ApiHandle>>,
    authorization: SingleFlight<Result<GrantTokens, AuthError>>,
    /// Bumped under the state lock by every `disconnect`; an authorization
    /// that started before a disconnect does not adopt its grant.
    disconnects: AtomicU64,
}

impl TokenManager {
    pub fn new(
        credentials: ClientCredentials,
        settings: AuthSettings,
        store: Arc<TokenStore>,
        browser: Arc<dyn Browser>,
        initial: PersistedTokens,
    ) -> Result<Arc<Self>, AuthError> {
        let http = http_client(settings.http_timeout)?;
        let credentials = Arc::new(credentials);
        let discovery =
            DiscoveryResolver::new(&settings.discovery_url, credentials.environment, http.clone());
        let provider = OAuthProvider::new(http, Arc::clone(&credentials));

        Ok(Arc::new(Self {
            credentials,
            settings,
            store,
            browser,
            provider,
            discovery,
            state: Mutex::new(TokenState::seeded(initial.refresh_token, initial.tenant_id)),
            handle: RwLock::new(None),
            authorization: SingleFlight::new(),
            disconnects: AtomicU64::new(0),
        }))
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Ensure a valid access token and return a handle for API calls.
    ///
    /// Runs the browser authorization when no grant is stored, and refreshes
    /// when the cached access token is missing or about to expire. Makes no
    /// network call while the cached token is valid.
    pub async fn authenticate(self: &Arc<Self>) -> Result<ApiHandle, AuthError> {
        let has_grant = self.state.lock().await.has_grant();
        if !has_grant {
            info!("no stored QuickBooks grant; starting authorization");
            self.authorize().await?;
        }

        let token = self.fresh_token(false).await?;
        let tenant_id = self.state.lock().await.tenant_id.clone().ok_or(AuthError::NotAuthenticated)?;

        let handle = ApiHandle {
            access_token: token.access_token,
            tenant_id,
            environment: self.credentials.environment,
        };
        *self.handle.write() = Some(handle.clone());
        Ok(handle)
    }

    /// Obtain a new access token from the refresh token, authorizing first
    /// when none is held.
    pub async fn refresh_access_token(self: &Arc<Self>) -> Result<RefreshedToken, AuthError> {
        self.fresh_token(true).await
    }

    /// The handle built by the last successful [`authenticate`](Self::authenticate).
    pub fn handle(&self) -> Result<ApiHandle, AuthError> {
        self.handle.read().clone().ok_or(AuthError::NotAuthenticated)
    }

    /// Revoke the refresh token and forget every token, in memory and on disk.
    ///
    /// A failed revocation is logged; local state is cleared regardless. An
    /// authorization still in progress is discarded when it completes.
    pub async fn disconnect(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        let refresh_token = state.refresh_token.take();
        state.clear();
        *self.handle.write() = None;

        match refresh_token {
            None => debug!("no refresh token held; nothing to revoke"),
            Some(token) => {
                let endpoints = self.discovery.resolve().await;
                match self.provider.revoke(&endpoints, &token).await {
                    Ok(()) => info!("QuickBooks refresh token revoked"),
                    Err(e) => warn!(err = %e, "token revocation failed; clearing local state anyway"),
                }
            }
        }
        drop(state);

        self.store.clear()
    }

    /// Return a token valid beyond the expiry buffer, refreshing if needed
    /// (always when `force`).
    async fn fresh_token(self: &Arc<Self>, force: bool) -> Result<RefreshedToken, AuthError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if !force {
            if let Some(token) = state.valid_access_token(now, self.settings.expiry_buffer) {
                let expires_in = state.remaining(now).map(|d| d.as_secs()).unwrap_or_default();
                debug!(expires_in, "using cached access token");
                return Ok(RefreshedToken { access_token: token.to_owned(), expires_in });
            }
        }

        let Some(refresh_token) = state.refresh_token.clone() else {
            drop(state);
            let grant = self.authorize().await?;
            return Ok(RefreshedToken::from(&grant));
        };

        let endpoints = self.discovery.resolve().await;

        let attempts = self.settings.max_refresh_attempts.max(1);
        let mut backoff = self.settings.initial_backoff;
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.provider.refresh(&endpoints, &refresh_token).await {
                Ok(token) => {
                    let expires_in = token.expires_in;
                    let rotated = state.apply_refresh(
                        token.access_token.clone(),
                        expires_in,
                        token.refresh_token,
                        Instant::now(),
                    );
                    if rotated {
                        self.store.save(state.refresh_token.as_deref(), None)?;
                        debug!("rotated refresh token persisted");
                    }
                    info!(attempt, expires_in, "QuickBooks access token refreshed");
                    return Ok(RefreshedToken { access_token: token.access_token, expires_in });
                }
                Err(AuthError::InvalidGrant(reason)) => {
                    warn!(attempt, %reason, "refresh token rejected; re-authorizing");
                    state.clear();
                    *self.handle.write() = None;
                    drop(state);
                    return match self.authorize().await {
                        Ok(grant) => Ok(RefreshedToken::from(&grant)),
                        Err(e) => Err(AuthError::Reauthorization(Box::new(e))),
                    };
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, err = %e, "token refresh attempt failed");
                    last = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuthError::RefreshExhausted { attempts, last })
    }

    /// Run the browser authorization, joining one already in flight.
    ///
    /// The flow task itself adopts the resulting grant, so it lands in token
    /// state even if every caller stops waiting. A grant adopted by a flight
    /// that finished just before this one started is returned as is.
    async fn authorize(self: &Arc<Self>) -> Result<GrantTokens, AuthError> {
        let this = Arc::clone(self);
        let outcome = self
            .authorization
            .run(move || async move {
                if let Some(grant) = this.state.lock().await.current_grant(Instant::now()) {
                    debug!("grant already held; skipping authorization");
                    return Ok(grant);
                }

                let generation = this.disconnects.load(Ordering::SeqCst);
                let endpoints = this.discovery.resolve().await;
                let flow = AuthorizationFlow::new(
                    this.provider.clone(),
                    endpoints,
                    Arc::clone(&this.store),
                    Arc::clone(&this.browser),
                    FlowSettings::from(&this.settings),
                );
                let grant = flow.run().await?;

                let mut state = this.state.lock().await;
                if this.disconnects.load(Ordering::SeqCst) != generation {
                    warn!("disconnected during authorization; discarding the new grant");
                    this.store.clear()?;
                    return Err(AuthError::NotAuthenticated);
                }
                state.apply_grant(&grant, Instant::now());
                Ok(grant)
            })
            .await;

        outcome.unwrap_or_else(|| Err(AuthError::Listener("authorization flow aborted".into())))
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
