//! Token verification against GitHub's `GET /user` endpoint.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, USER_AGENT};
use serde::Deserialize;
use url::Url;

use crate::classify::{ApiError, ErrorKind};
use crate::model::RateLimit;
use crate::store::Secret;

pub(crate) const GITHUB_ACCEPT: &str = "application/vnd.github+json";
pub(crate) const GITHUB_API_VERSION: &str = "2022-11-28";
pub(crate) const CLIENT_USER_AGENT: &str = concat!("classpilot/", env!("CARGO_PKG_VERSION"));

const SCOPES_HEADER: &str = "x-oauth-scopes";
const EXPIRATION_HEADER: &str = "github-authentication-token-expiration";

/// What GitHub reports about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub login: String,
    pub account_id: String,
    /// Granted scopes, or `None` when the response carried no scopes header
    /// (fine-grained tokens and GitHub App tokens).
    pub scopes: Option<BTreeSet<String>>,
    pub rate_limit: Option<RateLimit>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Checks a candidate token with the platform.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &Secret) -> Result<Verification, ApiError>;
}

/// Verifier calling `GET {base_url}/user`.
#[derive(Debug, Clone)]
pub struct GitHubVerifier {
    http: reqwest::Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct UserBody {
    login: String,
    id: u64,
}

impl GitHubVerifier {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn user_url(&self) -> Result<Url, ApiError> {
        endpoint(&self.base_url, "user")
    }
}

#[async_trait]
impl TokenVerifier for GitHubVerifier {
    async fn verify(&self, token: &Secret) -> Result<Verification, ApiError> {
        let response = self
            .http
            .get(self.user_url()?)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose()))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let headers = response.headers().clone();
        let user: UserBody = response.json().await.map_err(|e| {
            ApiError::new(ErrorKind::Unknown, format!("unexpected /user response: {}", e))
        })?;

        let verification = Verification {
            login: user.login,
            account_id: user.id.to_string(),
            scopes: parse_scopes(&headers),
            rate_limit: RateLimit::from_headers(&headers),
            expires_at: parse_expiration(&headers),
        };

        if let Some(rl) = &verification.rate_limit {
            rl.trace();
        }
        Ok(verification)
    }
}

/// Join a relative path onto the API base, keeping any base path prefix
/// (GitHub Enterprise serves the API under `/api/v3`).
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, ApiError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ApiError::new(ErrorKind::Unknown, format!("invalid API path {}: {}", path, e)))
}

fn parse_scopes(headers: &HeaderMap) -> Option<BTreeSet<String>> {
    let raw = headers.get(SCOPES_HEADER)?.to_str().ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Parse the token expiration header.
///
/// GitHub sends `2026-01-31 12:00:00 UTC`; offsets and RFC 3339 are accepted too.
fn parse_expiration(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(EXPIRATION_HEADER)?.to_str().ok()?.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix("UTC").unwrap_or(raw).trim();
    match NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S") {
        Ok(dt) => Some(dt.and_utc()),
        Err(e) => {
            tracing::warn!(value = raw, "unparsable token expiration header: {}", e);
            None
        }
    }
}

/// Scopes GitHub treats as implied by a broader grant.
const IMPLIED_BY: &[(&str, &[&str])] = &[
    ("read:org", &["write:org", "admin:org"]),
    ("write:org", &["admin:org"]),
    ("repo:status", &["repo"]),
    ("repo_deployment", &["repo"]),
    ("public_repo", &["repo"]),
    ("repo:invite", &["repo"]),
    ("security_events", &["repo"]),
    ("read:repo_hook", &["write:repo_hook", "admin:repo_hook"]),
    ("write:repo_hook", &["admin:repo_hook"]),
    ("read:public_key", &["write:public_key", "admin:public_key"]),
    ("write:public_key", &["admin:public_key"]),
    ("read:user", &["user"]),
    ("user:email", &["user"]),
    ("user:follow", &["user"]),
    ("read:packages", &["write:packages"]),
];

fn is_granted(required: &str, granted: &BTreeSet<String>) -> bool {
    if granted.contains(required) {
        return true;
    }
    IMPLIED_BY
        .iter()
        .find(|(scope, _)| *scope == required)
        .map(|(_, broader)| broader.iter().any(|b| granted.contains(*b)))
        .unwrap_or(false)
}

/// Required scopes not covered by `granted`, in the order given.
pub fn missing_scopes(required: &[String], granted: &BTreeSet<String>) -> Vec<String> {
    required
        .iter()
        .filter(|r| !is_granted(r, granted))
        .cloned()
        .collect()
}
