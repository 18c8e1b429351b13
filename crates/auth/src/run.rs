// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command runner shared by `main` and the binary smoke tests.

use std::collections::HashMap;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{ClientCredentials, Command, Config};
use crate::flow::{Browser, PrintBrowser, SystemBrowser};
use crate::manager::TokenManager;
use crate::store::{PersistedTokens, TokenStore, REALM_ID_KEY, REFRESH_TOKEN_KEY};

/// Initialize tracing/logging from config. Logs go to stderr so stdout
/// carries only command output.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Run one command and return the text to print.
pub async fn run(config: Config) -> anyhow::Result<String> {
    let store = Arc::new(TokenStore::new(&config.env_file));
    let file_vars = store.read_vars()?;
    let credentials = ClientCredentials::from_sources(&file_vars, &config.default_redirect_uri())?;
    let initial = initial_tokens(&file_vars, |key| std::env::var(key).ok());

    match config.command {
        Command::Status => Ok(status_report(&config, &credentials, &initial)),
        Command::Connect => {
            let manager = build_manager(&config, credentials, store, initial)?;
            let handle = manager.authenticate().await?;
            Ok(format!(
                "Connected to QuickBooks realm {} ({})\nAPI base URL: {}",
                handle.tenant_id(),
                handle.environment(),
                handle.api_base_url(),
            ))
        }
        Command::Disconnect => {
            let path = store.path().display().to_string();
            let manager = build_manager(&config, credentials, store, initial)?;
            manager.disconnect().await?;
            Ok(format!("Disconnected from QuickBooks; stored tokens removed from {path}"))
        }
    }
}

fn build_manager(
    config: &Config,
    credentials: ClientCredentials,
    store: Arc<TokenStore>,
    initial: PersistedTokens,
) -> anyhow::Result<Arc<TokenManager>> {
    let browser: Arc<dyn Browser> =
        if config.no_browser { Arc::new(PrintBrowser) } else { Arc::new(SystemBrowser) };
    Ok(TokenManager::new(credentials, config.auth_settings(), store, browser, initial)?)
}

/// Persisted tokens from the file, falling back to `lookup` for keys the
/// file does not hold. The file wins because every rotation is written
/// through to it.
fn initial_tokens(
    file_vars: &HashMap<String, String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> PersistedTokens {
    let get = |key: &str| {
        file_vars.get(key).cloned().filter(|v| !v.is_empty()).or_else(|| lookup(key)).filter(|v| !v.is_empty())
    };
    PersistedTokens { refresh_token: get(REFRESH_TOKEN_KEY), tenant_id: get(REALM_ID_KEY) }
}

fn status_report(config: &Config, credentials: &ClientCredentials, initial: &PersistedTokens) -> String {
    let refresh = initial.refresh_token.as_deref().map(mask).unwrap_or_else(|| "not set".to_owned());
    let realm = initial.tenant_id.as_deref().unwrap_or("not set");
    let state = if initial.refresh_token.is_some() && initial.tenant_id.is_some() {
        "connected"
    } else {
        "not connected"
    };

    [
        format!("status:        {state}"),
        format!("environment:   {}", credentials.environment),
        format!("client id:     {}", credentials.client_id),
        format!("redirect uri:  {}", credentials.redirect_uri),
        format!("env file:      {}", config.env_file.display()),
        format!("refresh token: {refresh}"),
        format!("realm id:      {realm}"),
    ]
    .join("\n")
}

/// Show only the last four characters of a secret.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(8))
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
