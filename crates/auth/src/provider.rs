// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw requests against the provider's token and revocation endpoints.
//!
//! Provider error bodies are decoded here, once, into [`AuthError`] kinds.

use std::sync::{Arc, Once};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ClientCredentials;
use crate::discovery::DiscoveryDocument;
use crate::error::AuthError;

/// Header carrying the provider's transaction id, quoted in support requests.
const INTUIT_TID: &str = "intuit_tid";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the HTTP client shared by discovery and the provider.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, AuthError> {
    ensure_crypto();
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::Config(format!("http client: {e}")))
}

/// Token endpoint success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// Token endpoint error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Clone, Copy)]
enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

/// Client for the provider's OAuth endpoints, bound to one set of credentials.
#[derive(Clone)]
pub struct OAuthProvider {
    http: reqwest::Client,
    credentials: Arc<ClientCredentials>,
}

impl OAuthProvider {
    pub fn new(http: reqwest::Client, credentials: Arc<ClientCredentials>) -> Self {
        Self { http, credentials }
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Consent URL the user is sent to.
    pub fn authorization_url(
        &self,
        endpoints: &DiscoveryDocument,
        scope: &str,
        state: &str,
    ) -> Result<String, AuthError> {
        let url = reqwest::Url::parse_with_params(
            &endpoints.authorization_endpoint,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("response_type", "code"),
                ("scope", scope),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| {
            AuthError::Config(format!(
                "invalid authorization endpoint {}: {e}",
                endpoints.authorization_endpoint
            ))
        })?;
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        endpoints: &DiscoveryDocument,
        code: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];
        self.token_request(&endpoints.token_endpoint, &form, GrantKind::AuthorizationCode).await
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(
        &self,
        endpoints: &DiscoveryDocument,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        self.token_request(&endpoints.token_endpoint, &form, GrantKind::RefreshToken).await
    }

    /// Revoke a token at the provider.
    pub async fn revoke(&self, endpoints: &DiscoveryDocument, token: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(&endpoints.revocation_endpoint)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| AuthError::Revocation(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let tid = transaction_id(&resp);
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Revocation(with_tid(format!("HTTP {status}: {body}"), tid)));
        }
        Ok(())
    }

    async fn token_request(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
        kind: GrantKind,
    ) -> Result<TokenResponse, AuthError> {
        let fail = |msg: String| match kind {
            GrantKind::AuthorizationCode => AuthError::Exchange(msg),
            GrantKind::RefreshToken => AuthError::Transient(msg),
        };

        let resp = self
            .http
            .post(token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| fail(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let tid = transaction_id(&resp);
        let body = resp.text().await.map_err(|e| fail(format!("read body: {e}")))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                let detail = err.error_description.unwrap_or_default();
                if err.error == "invalid_grant" {
                    let msg = with_tid(if detail.is_empty() { err.error } else { detail }, tid);
                    return Err(match kind {
                        GrantKind::RefreshToken => AuthError::InvalidGrant(msg),
                        GrantKind::AuthorizationCode => AuthError::Exchange(msg),
                    });
                }
                return Err(fail(with_tid(format!("{}: {detail}", err.error), tid)));
            }
            return Err(fail(with_tid(format!("HTTP {status}: {body}"), tid)));
        }

        serde_json::from_str(&body).map_err(|e| fail(with_tid(format!("parse response: {e}"), tid)))
    }
}

fn transaction_id(resp: &reqwest::Response) -> Option<String> {
    let tid = resp.headers().get(INTUIT_TID)?.to_str().ok()?.to_owned();
    tracing::debug!(intuit_tid = %tid, status = %resp.status(), url = %resp.url(), "provider response");
    Some(tid)
}

fn with_tid(msg: String, tid: Option<String>) -> String {
    match tid {
        Some(tid) => format!("{msg} (intuit_tid: {tid})"),
        None => msg,
    }
}

/// Generate a random CSRF state token (32 bytes, URL-safe base64).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
