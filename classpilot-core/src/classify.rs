//! Classification of failed GitHub API calls.
//!
//! Every failure crossing this crate's boundary is reduced to an
//! [`ErrorKind`], which decides whether [`RetryPolicy`](crate::retry::RetryPolicy)
//! waits and tries again or gives up immediately.

use std::fmt;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use thiserror::Error;

use crate::model::RateLimit;

/// Closed classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    AuthenticationFailed,
    AuthorizationInsufficient,
    NotFound,
    NetworkUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Whether waiting can change the outcome.
    ///
    /// `Unknown` is retried only when the caller opts in.
    pub fn is_retryable(self, retry_unknown: bool) -> bool {
        match self {
            Self::RateLimited | Self::NetworkUnavailable => true,
            Self::Unknown => retry_unknown,
            Self::AuthenticationFailed | Self::AuthorizationInsufficient | Self::NotFound => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::AuthenticationFailed => "authentication failed",
            Self::AuthorizationInsufficient => "insufficient authorization",
            Self::NotFound => "not found",
            Self::NetworkUnavailable => "network unavailable",
            Self::Unknown => "unexpected API error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified GitHub API failure.
#[derive(Debug, Error)]
#[error("{kind}: {message}{}", attempts_suffix(.attempts))]
pub struct ApiError {
    pub kind: ErrorKind,
    /// HTTP status, when the platform answered at all.
    pub status: Option<u16>,
    /// The platform's message, or the transport error text.
    pub message: String,
    /// Calls made before giving up. 1 unless retries happened.
    pub attempts: u32,
    pub rate_limit: Option<RateLimit>,
}

fn attempts_suffix(attempts: &u32) -> String {
    if *attempts > 1 {
        format!(" (after {} attempts)", attempts)
    } else {
        String::new()
    }
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            attempts: 1,
            rate_limit: None,
        }
    }

    /// Build a classified error from a non-success response's parts.
    pub fn from_parts(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let kind = classify_status(status, headers, body);
        Self {
            kind,
            status: Some(status.as_u16()),
            message: platform_message(status, body),
            attempts: 1,
            rate_limit: RateLimit::from_headers(headers),
        }
    }

    /// Consume a non-success response into a classified error.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Self::from_parts(status, &headers, &body)
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            kind: classify_transport(&err),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            attempts: 1,
            rate_limit: None,
        }
    }
}

/// Classify an HTTP status with its headers and body.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED => ErrorKind::AuthenticationFailed,
        StatusCode::FORBIDDEN if has_rate_limit_signal(headers, body) => ErrorKind::RateLimited,
        StatusCode::FORBIDDEN => ErrorKind::AuthorizationInsufficient,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::NetworkUnavailable,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a transport-level failure (no usable response).
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() || err.is_connect() {
        return ErrorKind::NetworkUnavailable;
    }
    if let Some(status) = err.status() {
        return classify_status(status, &HeaderMap::new(), "");
    }
    if err.is_request() && std::error::Error::source(err).is_some() {
        // Hyper-level I/O failures (reset, broken pipe) surface as request errors.
        return ErrorKind::NetworkUnavailable;
    }
    ErrorKind::Unknown
}

/// A 403 counts as rate limiting when the remaining quota is zero, a
/// `retry-after` header is present, or the body mentions the rate limit.
fn has_rate_limit_signal(headers: &HeaderMap, body: &str) -> bool {
    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    quota_exhausted
        || headers.contains_key("retry-after")
        || body.to_ascii_lowercase().contains("rate limit")
}

#[derive(Deserialize)]
struct GitHubErrorBody {
    message: String,
}

fn platform_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<GitHubErrorBody>(body) {
        Ok(parsed) => format!("{} ({})", parsed.message, status.as_u16()),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        Err(_) => {
            let snippet: String = body.trim().chars().take(200).collect();
            format!("HTTP {}: {}", status.as_u16(), snippet)
        }
    }
}
