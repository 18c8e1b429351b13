// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `qbo-auth` binary as a subprocess against a temporary env
//! file and, where needed, a local mock of the provider.

use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::sync::Once;
use std::time::{Duration, Instant};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `qbo-auth` binary.
pub fn qbo_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("qbo-auth")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A temporary `.env` file, removed on drop.
pub struct EnvFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl EnvFile {
    pub fn new(contents: &str) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".env");
        std::fs::write(&path, contents)?;
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arg(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn read(&self) -> anyhow::Result<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// A `qbo-auth` command with the caller's QuickBooks settings scrubbed from
/// the environment, so only the env file and flags apply.
pub fn qbo_command(args: &[&str]) -> anyhow::Result<Command> {
    let binary = qbo_binary();
    anyhow::ensure!(binary.exists(), "qbo-auth binary not found at {}", binary.display());

    let mut cmd = Command::new(binary);
    for (key, _) in std::env::vars() {
        if key.starts_with("QUICKBOOKS_") || key.starts_with("QBO_") {
            cmd.env_remove(key);
        }
    }
    cmd.args(args).args(["--log-level", "warn"]);
    Ok(cmd)
}

/// Run `qbo-auth` to completion.
pub fn run_qbo(args: &[&str]) -> anyhow::Result<Output> {
    Ok(qbo_command(args)?.stdin(Stdio::null()).output()?)
}

/// A running `qbo-auth connect` that is killed on drop.
pub struct ConnectProcess {
    child: Child,
    stderr_lines: mpsc::Receiver<String>,
}

impl ConnectProcess {
    /// Start `connect --no-browser` so the consent URL lands on stderr.
    pub fn start(env_file: &EnvFile, extra: &[&str]) -> anyhow::Result<Self> {
        let env_arg = env_file.arg();
        let mut args = vec!["connect", "--no-browser", "--env-file", env_arg.as_str()];
        args.extend_from_slice(extra);

        let mut child = qbo_command(&args)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("no stderr pipe"))?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self { child, stderr_lines: rx })
    }

    /// Wait for the authorization URL to be printed.
    pub fn wait_for_auth_url(&self, timeout: Duration) -> anyhow::Result<reqwest::Url> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            anyhow::ensure!(!left.is_zero(), "no authorization URL within {timeout:?}");
            let line = self.stderr_lines.recv_timeout(left)?;
            if let Some(url) = line.split_whitespace().find(|w| w.contains("state=")) {
                return Ok(reqwest::Url::parse(url)?);
            }
        }
    }

    /// Wait for the process to exit within `timeout`, returning its status,
    /// stdout, and the stderr lines not yet consumed.
    pub fn wait_exit(
        mut self,
        timeout: Duration,
    ) -> anyhow::Result<(std::process::ExitStatus, String, String)> {
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            anyhow::ensure!(Instant::now() < deadline, "qbo-auth did not exit within {timeout:?}");
            std::thread::sleep(Duration::from_millis(50));
        };

        let mut stdout = String::new();
        if let Some(mut out) = self.child.stdout.take() {
            std::io::Read::read_to_string(&mut out, &mut stdout)?;
        }
        // The reader thread ends at EOF, which disconnects the channel.
        let mut stderr = Vec::new();
        while let Ok(line) = self.stderr_lines.recv_timeout(Duration::from_secs(2)) {
            stderr.push(line);
        }
        Ok((status, stdout, stderr.join("\n")))
    }
}

impl Drop for ConnectProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Query parameter from a URL.
pub fn query_param(url: &reqwest::Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}

/// Start a mock provider serving discovery and a token endpoint that
/// answers every exchange with the same tokens.
pub async fn mock_provider() -> anyhow::Result<SocketAddr> {
    use axum::routing::{get, post};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let discovery = serde_json::json!({
        "authorization_endpoint": format!("http://{addr}/authorize"),
        "token_endpoint": format!("http://{addr}/token"),
        "revocation_endpoint": format!("http://{addr}/revoke"),
    });

    let app = axum::Router::new()
        .route(
            "/.well-known/openid_configuration",
            get(move || async move { axum::Json(discovery) }),
        )
        .route(
            "/token",
            post(|| async {
                axum::Json(serde_json::json!({
                    "access_token": "spec-access",
                    "refresh_token": "spec-refresh",
                    "expires_in": 3600,
                    "token_type": "bearer",
                }))
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}
