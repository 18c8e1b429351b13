// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smoke tests against the compiled `qbo-auth` binary.

use std::time::Duration;

use qbo_auth_specs::{
    ensure_crypto, free_port, mock_provider, query_param, run_qbo, ConnectProcess, EnvFile,
};

const CREDENTIALS: &str = "QUICKBOOKS_CLIENT_ID=smoke-client\nQUICKBOOKS_CLIENT_SECRET=smoke-secret\n";

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn status_without_tokens_reports_not_connected() -> anyhow::Result<()> {
    let env = EnvFile::new(CREDENTIALS)?;
    let output = run_qbo(&["status", "--env-file", &env.arg()])?;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("not connected"), "{out}");
    assert!(out.contains("sandbox"), "{out}");
    assert!(!out.contains("smoke-secret"), "{out}");
    Ok(())
}

#[test]
fn status_masks_stored_refresh_token() -> anyhow::Result<()> {
    let env = EnvFile::new(&format!(
        "{CREDENTIALS}QUICKBOOKS_ENVIRONMENT=production\nQUICKBOOKS_REFRESH_TOKEN=RT-stored-abcd\nQUICKBOOKS_REALM_ID=4620\n"
    ))?;
    let output = run_qbo(&["status", "--env-file", &env.arg()])?;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("status:        connected"), "{out}");
    assert!(out.contains("production"), "{out}");
    assert!(out.contains("4620"), "{out}");
    assert!(out.contains("********abcd"), "{out}");
    assert!(!out.contains("RT-stored"), "{out}");
    Ok(())
}

#[test]
fn missing_credentials_exit_with_config_error() -> anyhow::Result<()> {
    let env = EnvFile::new("UNRELATED=1\n")?;
    let output = run_qbo(&["status", "--env-file", &env.arg()])?;

    assert_eq!(output.status.code(), Some(2));
    let err = stderr(&output);
    assert!(err.contains("QUICKBOOKS_CLIENT_ID"), "{err}");
    assert!(err.contains("QUICKBOOKS_CLIENT_SECRET"), "{err}");
    Ok(())
}

#[test]
fn invalid_log_format_is_rejected() -> anyhow::Result<()> {
    let env = EnvFile::new(CREDENTIALS)?;
    let output = run_qbo(&["status", "--env-file", &env.arg(), "--log-format", "xml"])?;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("log format"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn disconnect_without_tokens_succeeds_offline() -> anyhow::Result<()> {
    let env = EnvFile::new(&format!("{CREDENTIALS}QUICKBOOKS_REALM_ID=77\n"))?;
    let closed = free_port()?;
    let discovery = format!("http://127.0.0.1:{closed}/.well-known/openid_configuration");
    let output =
        run_qbo(&["disconnect", "--env-file", &env.arg(), "--discovery-url", &discovery])?;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Disconnected"), "{}", stdout(&output));
    assert_eq!(env.read()?, CREDENTIALS);
    Ok(())
}

#[test]
fn connect_times_out_without_consent() -> anyhow::Result<()> {
    let env = EnvFile::new(CREDENTIALS)?;
    let port = free_port()?;
    let closed = free_port()?;
    let discovery = format!("http://127.0.0.1:{closed}/.well-known/openid_configuration");
    let port_arg = port.to_string();
    let process = ConnectProcess::start(
        &env,
        &["--callback-port", &port_arg, "--callback-timeout-secs", "1", "--discovery-url", &discovery],
    )?;

    // Discovery falls back to the built-in endpoints.
    let url = process.wait_for_auth_url(Duration::from_secs(10))?;
    assert_eq!(url.host_str(), Some("appcenter.intuit.com"));
    assert_eq!(query_param(&url, "client_id").as_deref(), Some("smoke-client"));

    let (status, _, err) = process.wait_exit(Duration::from_secs(10))?;
    assert_eq!(status.code(), Some(1));
    assert!(err.contains("authorization not completed"), "{err}");
    assert!(!env.read()?.contains("QUICKBOOKS_REFRESH_TOKEN"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_persists_tokens_after_consent() -> anyhow::Result<()> {
    ensure_crypto();
    let provider = mock_provider().await?;
    let port = free_port()?;
    let env = EnvFile::new(&format!(
        "{CREDENTIALS}QUICKBOOKS_REDIRECT_URI=http://127.0.0.1:{port}/callback\n"
    ))?;
    let discovery = format!("http://{provider}/.well-known/openid_configuration");
    let port_arg = port.to_string();
    let process = ConnectProcess::start(&env, &["--callback-port", &port_arg, "--discovery-url", &discovery])?;

    let url = process.wait_for_auth_url(Duration::from_secs(10))?;
    assert_eq!(url.path(), "/authorize");
    let redirect = query_param(&url, "redirect_uri").ok_or_else(|| anyhow::anyhow!("no redirect_uri"))?;
    let state = query_param(&url, "state").ok_or_else(|| anyhow::anyhow!("no state"))?;

    let callback = reqwest::Url::parse_with_params(
        &redirect,
        &[("code", "smoke-code"), ("state", state.as_str()), ("realmId", "8080")],
    )?;
    let resp = reqwest::Client::new().get(callback).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let (status, out, err) = process.wait_exit(Duration::from_secs(10))?;
    assert!(status.success(), "stderr: {err}");
    assert!(out.contains("realm 8080"), "{out}");

    let contents = env.read()?;
    assert!(contents.contains("QUICKBOOKS_REFRESH_TOKEN=spec-refresh"), "{contents}");
    assert!(contents.contains("QUICKBOOKS_REALM_ID=8080"), "{contents}");
    assert!(contents.contains("QUICKBOOKS_CLIENT_ID=smoke-client"), "{contents}");
    Ok(())
}
