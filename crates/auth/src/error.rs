// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

/// Errors produced by the token lifecycle.
///
/// Payloads are plain strings so a single authorization outcome can be cloned
/// out to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Required client credentials are missing or malformed.
    Config(String),
    /// Discovery document could not be fetched or parsed. Logged, never surfaced.
    Discovery(String),
    /// Callback `state` did not match the one issued for this flow.
    CsrfMismatch,
    /// The token endpoint rejected or failed the authorization-code exchange.
    Exchange(String),
    /// The refresh token is expired or revoked.
    InvalidGrant(String),
    /// An invalid grant was detected and the forced re-authorization also failed.
    Reauthorization(Box<AuthError>),
    /// A single refresh attempt failed for a retryable reason.
    Transient(String),
    /// Every refresh attempt failed; carries the last underlying cause.
    RefreshExhausted { attempts: u32, last: String },
    /// Remote revocation failed. Logged, never surfaced.
    Revocation(String),
    /// No successful `authenticate` has completed yet.
    NotAuthenticated,
    /// The user did not complete the browser step in time.
    AuthorizationTimeout(Duration),
    /// The local callback listener failed to bind or stopped unexpectedly.
    Listener(String),
    /// Reading or writing the token file failed.
    Store(String),
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Discovery(_) => "DISCOVERY",
            Self::CsrfMismatch => "CSRF_MISMATCH",
            Self::Exchange(_) => "EXCHANGE_FAILED",
            Self::InvalidGrant(_) => "INVALID_GRANT",
            Self::Reauthorization(_) => "REAUTHORIZATION_FAILED",
            Self::Transient(_) => "TRANSIENT",
            Self::RefreshExhausted { .. } => "REFRESH_FAILED",
            Self::Revocation(_) => "REVOCATION_FAILED",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::AuthorizationTimeout(_) => "AUTHORIZATION_TIMEOUT",
            Self::Listener(_) => "LISTENER",
            Self::Store(_) => "STORE",
        }
    }

    /// Whether a refresh attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Process exit code used by the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery failed: {msg}"),
            Self::CsrfMismatch => f.write_str("OAuth CSRF state mismatch"),
            Self::Exchange(msg) => write!(f, "authorization code exchange failed: {msg}"),
            Self::InvalidGrant(msg) => write!(f, "refresh token rejected (invalid_grant): {msg}"),
            Self::Reauthorization(inner) => {
                write!(f, "refresh token was invalid and re-authorization failed: {inner}")
            }
            Self::Transient(msg) => write!(f, "token refresh failed: {msg}"),
            Self::RefreshExhausted { attempts, last } => {
                write!(f, "failed to refresh QuickBooks token after {attempts} attempts: {last}")
            }
            Self::Revocation(msg) => write!(f, "token revocation failed: {msg}"),
            Self::NotAuthenticated => {
                f.write_str("QuickBooks not authenticated; call authenticate() first")
            }
            Self::AuthorizationTimeout(after) => {
                write!(f, "authorization not completed within {}s", after.as_secs())
            }
            Self::Listener(msg) => write!(f, "callback listener error: {msg}"),
            Self::Store(msg) => write!(f, "token store error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
