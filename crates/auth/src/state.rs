// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use crate::flow::GrantTokens;

/// Longest access-token lifetime honored; larger provider values are capped.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

fn expiry_at(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
    now.checked_add(lifetime).unwrap_or(now)
}

/// In-memory token state owned by the manager.
///
/// An access token is only ever held together with its expiry, and the
/// refresh token and tenant id are set and cleared as a pair by every
/// authorization.
#[derive(Debug, Default, Clone)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub access_token_expiry: Option<Instant>,
    pub refresh_token: Option<String>,
    pub tenant_id: Option<String>,
}

impl TokenState {
    /// State seeded from persisted values.
    pub fn seeded(refresh_token: Option<String>, tenant_id: Option<String>) -> Self {
        Self { refresh_token, tenant_id, ..Self::default() }
    }

    /// Whether a refresh token and tenant id are both present.
    pub fn has_grant(&self) -> bool {
        self.refresh_token.is_some() && self.tenant_id.is_some()
    }

    /// The cached access token, if it stays valid for longer than `buffer`.
    pub fn valid_access_token(&self, now: Instant, buffer: Duration) -> Option<&str> {
        match (&self.access_token, self.access_token_expiry) {
            (Some(token), Some(expiry)) if now + buffer < expiry => Some(token),
            _ => None,
        }
    }

    /// The complete grant held, if its access token is still unexpired.
    pub fn current_grant(&self, now: Instant) -> Option<GrantTokens> {
        let access_token = self.valid_access_token(now, Duration::ZERO)?;
        Some(GrantTokens {
            access_token: access_token.to_owned(),
            refresh_token: self.refresh_token.clone()?,
            tenant_id: self.tenant_id.clone()?,
            expires_in: self.remaining(now)?.as_secs(),
        })
    }

    /// Time left on the cached access token.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.access_token_expiry.map(|expiry| expiry.saturating_duration_since(now))
    }

    /// Adopt the tokens produced by an authorization.
    pub fn apply_grant(&mut self, grant: &GrantTokens, now: Instant) {
        self.access_token = Some(grant.access_token.clone());
        self.access_token_expiry = Some(expiry_at(now, grant.expires_in));
        self.refresh_token = Some(grant.refresh_token.clone());
        self.tenant_id = Some(grant.tenant_id.clone());
    }

    /// Adopt a refreshed access token. Returns `true` when the refresh token
    /// was rotated.
    pub fn apply_refresh(
        &mut self,
        access_token: String,
        expires_in: u64,
        refresh_token: Option<String>,
        now: Instant,
    ) -> bool {
        self.access_token = Some(access_token);
        self.access_token_expiry = Some(expiry_at(now, expires_in));
        match refresh_token {
            Some(rotated) if self.refresh_token.as_deref() != Some(rotated.as_str()) => {
                self.refresh_token = Some(rotated);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
