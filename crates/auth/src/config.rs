// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::discovery::DEFAULT_DISCOVERY_URL;
use crate::error::AuthError;

pub const CLIENT_ID_KEY: &str = "QUICKBOOKS_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "QUICKBOOKS_CLIENT_SECRET";
pub const REDIRECT_URI_KEY: &str = "QUICKBOOKS_REDIRECT_URI";
pub const ENVIRONMENT_KEY: &str = "QUICKBOOKS_ENVIRONMENT";

/// OAuth scope for the accounting API.
pub const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";

/// QuickBooks environment the tokens are issued for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox)
    }

    /// Base URL of the accounting API for this environment.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            Self::Production => "https://quickbooks.api.intuit.com",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => f.write_str("sandbox"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(AuthError::Config(format!(
                "{ENVIRONMENT_KEY} must be sandbox or production, got {other:?}"
            ))),
        }
    }
}

/// OAuth client registration. Immutable for the life of the process.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub environment: Environment,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("environment", &self.environment)
            .finish()
    }
}

impl ClientCredentials {
    /// Resolve credentials from a key lookup.
    ///
    /// `default_redirect_uri` is used when no `QUICKBOOKS_REDIRECT_URI` is set.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        default_redirect_uri: &str,
    ) -> Result<Self, AuthError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let client_id = get(CLIENT_ID_KEY);
        if client_id.is_none() {
            missing.push(CLIENT_ID_KEY);
        }
        let client_secret = get(CLIENT_SECRET_KEY);
        if client_secret.is_none() {
            missing.push(CLIENT_SECRET_KEY);
        }
        let redirect_uri = get(REDIRECT_URI_KEY)
            .or_else(|| Some(default_redirect_uri.to_owned()).filter(|v| !v.is_empty()));
        if redirect_uri.is_none() {
            missing.push(REDIRECT_URI_KEY);
        }

        let (Some(client_id), Some(client_secret), Some(redirect_uri)) =
            (client_id, client_secret, redirect_uri)
        else {
            return Err(AuthError::Config(format!("missing required settings: {}", missing.join(", "))));
        };

        let environment = match get(ENVIRONMENT_KEY) {
            Some(env) => env.parse()?,
            None => Environment::default(),
        };

        Ok(Self { client_id, client_secret, redirect_uri, environment })
    }

    /// Resolve credentials from the process environment, falling back to the
    /// values read from the token file.
    pub fn from_sources(
        file_vars: &HashMap<String, String>,
        default_redirect_uri: &str,
    ) -> Result<Self, AuthError> {
        Self::from_lookup(
            |key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()),
            default_redirect_uri,
        )
    }
}

/// Tunables for the token lifecycle.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub discovery_url: String,
    pub scope: String,
    /// Address the authorization callback listener binds to.
    pub callback_addr: SocketAddr,
    /// `None` waits for the browser step indefinitely.
    pub callback_timeout: Option<Duration>,
    /// Delay between answering the callback and closing the listener.
    pub close_delay: Duration,
    /// Access tokens this close to expiry are refreshed.
    pub expiry_buffer: Duration,
    pub max_refresh_attempts: u32,
    pub initial_backoff: Duration,
    pub http_timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.to_owned(),
            scope: ACCOUNTING_SCOPE.to_owned(),
            callback_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            callback_timeout: Some(Duration::from_secs(300)),
            close_delay: Duration::from_secs(1),
            expiry_buffer: Duration::from_secs(60),
            max_refresh_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect a process to QuickBooks Online and keep it authenticated.
#[derive(Debug, Parser)]
#[command(name = "qbo-auth", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Key=value file holding client credentials and persisted tokens.
    #[arg(long, global = true, env = "QBO_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    /// Local port for the OAuth callback listener.
    #[arg(long, global = true, env = "QBO_CALLBACK_PORT", default_value_t = 8000)]
    pub callback_port: u16,

    /// Seconds to wait for the browser authorization (0 = wait indefinitely).
    #[arg(long, global = true, env = "QBO_CALLBACK_TIMEOUT_SECS", default_value_t = 300)]
    pub callback_timeout_secs: u64,

    /// Provider discovery document URL.
    #[arg(long, global = true, env = "QBO_DISCOVERY_URL", default_value = DEFAULT_DISCOVERY_URL)]
    pub discovery_url: String,

    /// Print the authorization URL instead of opening a browser.
    #[arg(long, global = true, env = "QBO_NO_BROWSER")]
    pub no_browser: bool,

    /// Log format (json or text).
    #[arg(long, global = true, env = "QBO_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "QBO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Authenticate, running the browser flow when no usable grant exists.
    Connect,
    /// Revoke the refresh token and clear stored credentials.
    Disconnect,
    /// Show what is configured without touching the network.
    Status,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.callback_port == 0 {
            anyhow::bail!("--callback-port must be non-zero (it is part of the registered redirect URI)");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.discovery_url.trim().is_empty() {
            anyhow::bail!("--discovery-url must not be empty");
        }
        Ok(())
    }

    pub fn default_redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.callback_port)
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        match self.callback_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            discovery_url: self.discovery_url.clone(),
            callback_addr: SocketAddr::from(([127, 0, 0, 1], self.callback_port)),
            callback_timeout: self.callback_timeout(),
            ..AuthSettings::default()
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
