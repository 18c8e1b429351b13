// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider endpoint discovery, memoized per process.

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::Environment;
use crate::error::AuthError;

pub const DEFAULT_DISCOVERY_URL: &str =
    "https://developer.intuit.com/.well-known/openid_configuration";

const AUTHORIZATION_ENDPOINT: &str = "https://appcenter.intuit.com/connect/oauth2";
const TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const REVOCATION_ENDPOINT: &str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";
const USERINFO_PRODUCTION: &str = "https://accounts.platform.intuit.com/v1/openid_connect/userinfo";
const USERINFO_SANDBOX: &str =
    "https://sandbox-accounts.platform.intuit.com/v1/openid_connect/userinfo";

/// Endpoint URLs published by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
}

impl DiscoveryDocument {
    /// Built-in endpoints used when discovery is unavailable.
    pub fn intuit_defaults(environment: Environment) -> Self {
        let userinfo = match environment {
            Environment::Sandbox => USERINFO_SANDBOX,
            Environment::Production => USERINFO_PRODUCTION,
        };
        Self {
            authorization_endpoint: AUTHORIZATION_ENDPOINT.to_owned(),
            token_endpoint: TOKEN_ENDPOINT.to_owned(),
            revocation_endpoint: REVOCATION_ENDPOINT.to_owned(),
            userinfo_endpoint: Some(userinfo.to_owned()),
        }
    }
}

/// Fetches the discovery document once and caches a successful result.
///
/// Failures are never cached, so a later call retries the fetch.
pub struct DiscoveryResolver {
    url: String,
    environment: Environment,
    http: reqwest::Client,
    cached: OnceCell<DiscoveryDocument>,
}

impl DiscoveryResolver {
    pub fn new(url: impl Into<String>, environment: Environment, http: reqwest::Client) -> Self {
        Self { url: url.into(), environment, http, cached: OnceCell::new() }
    }

    /// Resolve provider endpoints. Never fails: on any fetch or parse error the
    /// built-in defaults are returned.
    pub async fn resolve(&self) -> DiscoveryDocument {
        match self.cached.get_or_try_init(|| self.fetch()).await {
            Ok(doc) => doc.clone(),
            Err(e) => {
                tracing::warn!(url = %self.url, err = %e, "discovery failed, using default endpoints");
                DiscoveryDocument::intuit_defaults(self.environment)
            }
        }
    }

    async fn fetch(&self) -> Result<DiscoveryDocument, AuthError> {
        let resp = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Discovery(format!("HTTP {status}")));
        }

        let doc: DiscoveryDocument =
            resp.json().await.map_err(|e| AuthError::Discovery(format!("malformed document: {e}")))?;
        tracing::debug!(token_endpoint = %doc.token_endpoint, "discovery document fetched");
        Ok(doc)
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
