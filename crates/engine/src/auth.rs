// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential resolution for containerized agents.
//!
//! Sandboxes run in isolated environments without access to the host's
//! keychain or config files, so the engine resolves a credential on the
//! host and injects it at sandbox-configuration time.
//!
//! Resolution order:
//!
//! ```text
//! 1. ANTHROPIC_API_KEY env var
//! 2. macOS Keychain ("Claude Code-credentials")
//! 3. ~/.claude/.credentials.json → claudeAiOauth.accessToken
//! 4. ~/.claude/.claude.json → primaryApiKey
//! ```
//!
//! The first non-empty, non-expired result wins. Failures to read any
//! individual source are logged and skipped, never propagated. Results are
//! cached for five minutes.

use parking_lot::Mutex;
use qm_core::Clock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// How long a resolved credential is served from cache.
pub const CACHE_TTL_MS: i64 = 5 * 60 * 1000;

/// Long-lived key vs short-lived token. The two differ only in how they
/// are injected into a sandbox, so this is a kind tag, not a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    OauthToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    Keychain,
    ConfigFile,
}

/// A resolved agent credential. In-memory only; never persisted.
#[derive(Debug, Clone)]
pub struct Credential {
    pub secret: String,
    pub refresh: Option<String>,
    pub kind: CredentialKind,
    pub source: CredentialSource,
    /// Epoch milliseconds, for short-lived tokens.
    pub expires_at_ms: Option<i64>,
    pub scopes: Vec<String>,
}

impl Credential {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map(|exp| exp <= now_ms).unwrap_or(false)
    }
}

/// Summary returned by the `system_status` tool.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CredentialSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CredentialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

struct CacheEntry {
    credential: Credential,
    cached_at_ms: i64,
}

/// Resolves and caches the agent credential.
pub struct AuthReader {
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CacheEntry>>,
}

impl AuthReader {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, cache: Mutex::new(None) }
    }

    /// Resolve a credential, serving from cache within the TTL.
    pub async fn resolve(&self) -> Option<Credential> {
        let now = self.clock.now_ms();
        if let Some(entry) = self.cache.lock().as_ref() {
            let fresh = now.saturating_sub(entry.cached_at_ms) < CACHE_TTL_MS;
            if fresh && !entry.credential.is_expired(now) {
                return Some(entry.credential.clone());
            }
        }

        let resolved = self.resolve_uncached(now).await;
        let mut cache = self.cache.lock();
        match &resolved {
            Some(credential) => {
                *cache = Some(CacheEntry { credential: credential.clone(), cached_at_ms: now })
            }
            None => *cache = None,
        }
        resolved
    }

    /// Drop the cached credential so the next resolve walks the chain.
    pub fn clear(&self) {
        *self.cache.lock() = None;
    }

    pub async fn status(&self) -> AuthStatus {
        match self.resolve().await {
            Some(c) => AuthStatus {
                authenticated: true,
                source: Some(c.source),
                kind: Some(c.kind),
                expires_at_ms: c.expires_at_ms,
            },
            None => {
                AuthStatus { authenticated: false, source: None, kind: None, expires_at_ms: None }
            }
        }
    }

    pub async fn validate(&self) -> bool {
        self.resolve().await.is_some()
    }

    async fn resolve_uncached(&self, now_ms: i64) -> Option<Credential> {
        for candidate in [
            read_env_api_key(),
            read_keychain_token().await,
            read_credentials_file(),
            read_claude_json_api_key(),
        ]
        .into_iter()
        .flatten()
        {
            if candidate.is_expired(now_ms) {
                tracing::debug!(source = ?candidate.source, "skipping expired credential");
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

fn read_env_api_key() -> Option<Credential> {
    let key = std::env::var("ANTHROPIC_API_KEY").ok()?;
    if key.is_empty() {
        return None;
    }
    Some(Credential {
        secret: key,
        refresh: None,
        kind: CredentialKind::ApiKey,
        source: CredentialSource::Environment,
        expires_at_ms: None,
        scopes: Vec::new(),
    })
}

/// Read the OAuth blob from the macOS Keychain. The subprocess runs through
/// tokio so the reactor is never blocked on the security daemon.
#[cfg(target_os = "macos")]
async fn read_keychain_token() -> Option<Credential> {
    let output = tokio::process::Command::new("security")
        .args(["find-generic-password", "-s", "Claude Code-credentials", "-w"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8(output.stdout).ok()?;
    parse_oauth_blob(raw.trim(), CredentialSource::Keychain)
}

#[cfg(not(target_os = "macos"))]
async fn read_keychain_token() -> Option<Credential> {
    None
}

/// `~/.claude/.credentials.json`.
fn read_credentials_file() -> Option<Credential> {
    let path = claude_dir()?.join(".credentials.json");
    let content = read_logged(&path)?;
    parse_oauth_blob(&content, CredentialSource::ConfigFile)
}

/// `~/.claude/.claude.json`.
fn read_claude_json_api_key() -> Option<Credential> {
    let path = claude_dir()?.join(".claude.json");
    let content = read_logged(&path)?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    let key = value.get("primaryApiKey").and_then(|v| v.as_str()).filter(|s| !s.is_empty())?;
    Some(Credential {
        secret: key.to_string(),
        refresh: None,
        kind: CredentialKind::ApiKey,
        source: CredentialSource::ConfigFile,
        expires_at_ms: None,
        scopes: Vec::new(),
    })
}

/// Shared shape of the keychain blob and `.credentials.json`.
fn parse_oauth_blob(raw: &str, source: CredentialSource) -> Option<Credential> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let oauth = value.get("claudeAiOauth")?;
    let token = oauth.get("accessToken").and_then(|v| v.as_str()).filter(|s| !s.is_empty())?;
    let refresh = oauth.get("refreshToken").and_then(|v| v.as_str()).map(str::to_string);
    let expires_at_ms = oauth.get("expiresAt").and_then(|v| v.as_i64());
    let scopes = oauth
        .get("scopes")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    Some(Credential {
        secret: token.to_string(),
        refresh,
        kind: CredentialKind::OauthToken,
        source,
        expires_at_ms,
        scopes,
    })
}

fn read_logged(path: &std::path::Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "credential source unreadable");
            None
        }
    }
}

fn claude_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".claude"))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
