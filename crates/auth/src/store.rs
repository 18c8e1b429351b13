// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence in a flat `KEY=VALUE` file with atomic writes.
//!
//! Only the refresh token and realm id lines are ever rewritten; every other
//! line in the file passes through untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::AuthError;

pub const REFRESH_TOKEN_KEY: &str = "QUICKBOOKS_REFRESH_TOKEN";
pub const REALM_ID_KEY: &str = "QUICKBOOKS_REALM_ID";

/// Tokens recovered from the file at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistedTokens {
    pub refresh_token: Option<String>,
    pub tenant_id: Option<String>,
}

/// Reads and rewrites the persisted token lines of one file.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every `KEY=VALUE` pair in the file. A missing file has no pairs.
    pub fn read_vars(&self) -> Result<HashMap<String, String>, AuthError> {
        let Some(contents) = self.read_contents()? else {
            return Ok(HashMap::new());
        };
        Ok(contents.lines().filter_map(parse_line).collect())
    }

    pub fn load(&self) -> Result<PersistedTokens, AuthError> {
        let mut vars = self.read_vars()?;
        let mut take = |key: &str| vars.remove(key).filter(|v| !v.is_empty());
        Ok(PersistedTokens { refresh_token: take(REFRESH_TOKEN_KEY), tenant_id: take(REALM_ID_KEY) })
    }

    /// Write the given tokens. A `None` leaves that key's line as it is.
    pub fn save(&self, refresh_token: Option<&str>, tenant_id: Option<&str>) -> Result<(), AuthError> {
        let updates: Vec<(&str, Option<&str>)> = [
            refresh_token.map(|v| (REFRESH_TOKEN_KEY, Some(v))),
            tenant_id.map(|v| (REALM_ID_KEY, Some(v))),
        ]
        .into_iter()
        .flatten()
        .collect();
        if updates.is_empty() {
            return Ok(());
        }
        self.rewrite(&updates)
    }

    /// Remove the persisted token lines.
    pub fn clear(&self) -> Result<(), AuthError> {
        self.rewrite(&[(REFRESH_TOKEN_KEY, None), (REALM_ID_KEY, None)])
    }

    fn rewrite(&self, updates: &[(&str, Option<&str>)]) -> Result<(), AuthError> {
        let _guard = self.lock.lock();
        let contents = self.read_contents()?.unwrap_or_default();
        let updated = apply_updates(&contents, updates);
        if updated == contents {
            return Ok(());
        }
        write_atomic(&self.path, &updated)?;
        tracing::debug!(path = %self.path.display(), keys = updates.len(), "token file updated");
        Ok(())
    }

    fn read_contents(&self) -> Result<Option<String>, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Store(format!("read {}: {e}", self.path.display()))),
        }
    }
}

/// Parse one line into a key/value pair. Blank lines and comments yield `None`.
fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_owned(), unquote(value.trim()).to_owned()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

/// Rewrite `contents` so each updated key has exactly one line (or none when
/// its value is `None`). Unrelated lines keep their text and order.
fn apply_updates(contents: &str, updates: &[(&str, Option<&str>)]) -> String {
    let mut written = vec![false; updates.len()];
    let mut out: Vec<String> = Vec::new();

    let body = contents.strip_suffix('\n').unwrap_or(contents);
    if !body.is_empty() {
        for line in body.split('\n') {
            let idx = line_key(line).and_then(|key| updates.iter().position(|(k, _)| *k == key));
            match idx {
                None => out.push(line.to_owned()),
                Some(i) => {
                    if !written[i] {
                        written[i] = true;
                        if let Some(value) = updates[i].1 {
                            out.push(format!("{}={value}", updates[i].0));
                        }
                    }
                }
            }
        }
    }

    for (i, (key, value)) in updates.iter().enumerate() {
        if let (false, Some(value)) = (written[i], value) {
            out.push(format!("{key}={value}"));
        }
    }

    if out.is_empty() {
        return String::new();
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

/// Atomic write (tmp + rename) with a per-call temp name so concurrent
/// writers never share a temp file.
///
/// A symlinked path is written through to its target, and the existing
/// file's permissions carry over to the replacement.
fn write_atomic(path: &Path, contents: &str) -> Result<(), AuthError> {
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let store_err = |e: std::io::Error| AuthError::Store(format!("write {}: {e}", path.display()));
    let (target, permissions) = match std::fs::canonicalize(path) {
        Ok(target) => {
            let permissions = std::fs::metadata(&target).map_err(store_err)?.permissions();
            (target, Some(permissions))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (path.to_path_buf(), None),
        Err(e) => return Err(store_err(e)),
    };

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        target.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = target.with_file_name(tmp_name);

    // Permissions are applied before any contents are written.
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        if let Some(permissions) = permissions {
            file.set_permissions(permissions)?;
        }
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, &target)
    };
    let result = write();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(store_err(e));
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
