//! Domain model types for classpilot credentials.
//!
//! - [`Credential`] - A resolved GitHub token with identity, scope and expiry metadata
//! - [`TokenType`] - Classic or fine-grained, detected from the token prefix
//! - [`StorageType`] - Which backend a credential lives in
//! - [`RateLimit`] - Snapshot of the `x-ratelimit-*` response headers
//! - [`mask_token`] - Render a token so it can appear in logs and errors

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// Literal prefix of classic personal access tokens.
pub const CLASSIC_PREFIX: &str = "ghp_";

/// Literal prefix of fine-grained personal access tokens.
pub const FINE_GRAINED_PREFIX: &str = "github_pat_";

/// Other prefixes GitHub issues (OAuth, user-to-server, server-to-server, refresh).
const OTHER_GITHUB_PREFIXES: [&str; 4] = ["gho_", "ghu_", "ghs_", "ghr_"];

const MASK: &str = "****";

/// Token format, detected purely from the literal prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    #[serde(rename = "classic")]
    Classic,
    #[serde(rename = "fine-grained")]
    FineGrained,
}

impl TokenType {
    /// Detect the token type from its prefix.
    ///
    /// `github_pat_` is fine-grained; everything else is treated as classic.
    /// Use [`is_standard_format`] to tell whether the prefix was recognised.
    pub fn detect(raw: &str) -> Self {
        if raw.starts_with(FINE_GRAINED_PREFIX) {
            Self::FineGrained
        } else {
            Self::Classic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::FineGrained => "fine-grained",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the token carries one of the prefixes GitHub issues.
///
/// Advisory only: non-standard tokens are still accepted.
pub fn is_standard_format(raw: &str) -> bool {
    known_prefix(raw).is_some()
}

fn known_prefix(raw: &str) -> Option<&'static str> {
    [CLASSIC_PREFIX, FINE_GRAINED_PREFIX]
        .into_iter()
        .chain(OTHER_GITHUB_PREFIXES)
        .find(|p| raw.starts_with(*p))
}

/// Render a token for logs and error messages.
///
/// Shows at most the recognised type prefix followed by `****`. Unknown
/// formats, and tokens too short to have any hidden part, render as `****`.
pub fn mask_token(raw: &str) -> String {
    match known_prefix(raw) {
        Some(prefix) if raw.len() >= prefix.len() + MASK.len() => format!("{}{}", prefix, MASK),
        _ => MASK.to_string(),
    }
}

/// Where a credential is stored, in descending resolution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    ConfigFile,
    Keychain,
    Environment,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigFile => "config_file",
            Self::Keychain => "keychain",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "config_file" | "config" | "file" => Ok(Self::ConfigFile),
            "keychain" | "keyring" => Ok(Self::Keychain),
            "environment" | "env" => Ok(Self::Environment),
            other => Err(format!("unknown storage type: {}", other)),
        }
    }
}

/// How close a credential is to its expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    /// No expiration recorded.
    NonExpiring,
    Valid,
    /// Expires within the warning threshold.
    ExpiringSoon { remaining: Duration },
    Expired { since: Duration },
}

/// A GitHub access token plus the metadata known about it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: Secret,
    pub token_type: TokenType,
    /// Granted scopes. Empty when the backend does not record them.
    pub scopes: BTreeSet<String>,
    pub login: Option<String>,
    pub account_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub storage_type: StorageType,
}

impl Credential {
    /// Build a credential from a raw token read out of `storage_type`.
    pub fn from_raw(token: Secret, storage_type: StorageType) -> Self {
        let token_type = TokenType::detect(token.expose());
        Self {
            token,
            token_type,
            scopes: BTreeSet::new(),
            login: None,
            account_id: None,
            expires_at: None,
            storage_type,
        }
    }

    /// Masked rendering of the token.
    pub fn masked(&self) -> String {
        mask_token(self.token.expose())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp <= Utc::now()).unwrap_or(false)
    }

    /// Classify the expiration relative to `now` and a warning threshold.
    pub fn expiry_status(&self, now: DateTime<Utc>, threshold: Duration) -> ExpiryStatus {
        match self.expires_at {
            None => ExpiryStatus::NonExpiring,
            Some(exp) if exp <= now => ExpiryStatus::Expired { since: now - exp },
            Some(exp) if exp - now <= threshold => ExpiryStatus::ExpiringSoon {
                remaining: exp - now,
            },
            Some(_) => ExpiryStatus::Valid,
        }
    }
}

/// Snapshot of the rate-limit headers on a GitHub response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    /// Parse `x-ratelimit-limit`, `x-ratelimit-remaining` and `x-ratelimit-reset`.
    ///
    /// Returns `None` unless both limit and remaining are present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };

        Some(Self {
            limit: number("x-ratelimit-limit")?,
            remaining: number("x-ratelimit-remaining")?,
            reset_at: number("x-ratelimit-reset")
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Less than a tenth of the quota left.
    pub fn is_low(&self) -> bool {
        self.remaining.saturating_mul(10) < self.limit
    }

    /// Log the snapshot, warning when the quota is running low.
    pub(crate) fn trace(&self) {
        if self.is_low() {
            tracing::warn!(
                remaining = self.remaining,
                limit = self.limit,
                reset_at = ?self.reset_at,
                "GitHub API rate limit running low"
            );
        } else {
            tracing::debug!(remaining = self.remaining, limit = self.limit, "rate limit");
        }
    }
}
