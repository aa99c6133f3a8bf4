//! Retry with exponential backoff for GitHub API operations.
//!
//! [`RetryPolicy::with_retry`] takes the operation as a closure producing a
//! future, so any call (or group of calls) can be wrapped. Failures are
//! converted into [`ApiError`] and classified; only rate limits and network
//! failures are waited out.
//!
//! The wrapped operation must be safe to run more than once.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::classify::{ApiError, ErrorKind};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Retry settings for API operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    #[serde(with = "millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Treat [`ErrorKind::Unknown`] as transient.
    pub retry_unknown: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_unknown: false,
        }
    }
}

/// Per-call retry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// 1-based number of the attempt in flight.
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error_kind: Option<ErrorKind>,
    /// Delay that will precede the next attempt.
    pub next_delay: Duration,
}

impl RetryContext {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_attempts: policy.max_attempts,
            last_error_kind: None,
            next_delay: policy.delay_for(1),
        }
    }

    fn has_budget(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Opt this policy into retrying unclassified failures.
    pub fn retry_unknown(mut self, retry: bool) -> Self {
        self.retry_unknown = retry;
        self
    }

    /// Delay after the given 1-based failed attempt: `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, hits a non-retryable error, or
    /// exhausts `max_attempts`.
    ///
    /// The returned error carries the number of calls that were made.
    pub async fn with_retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        let mut ctx = RetryContext::new(self);

        loop {
            let err: ApiError = match operation().await {
                Ok(value) => {
                    if ctx.attempt > 1 {
                        debug!(attempt = ctx.attempt, "API call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e.into(),
            };

            ctx.last_error_kind = Some(err.kind);

            if !err.kind.is_retryable(self.retry_unknown) {
                debug!(kind = %err.kind, attempt = ctx.attempt, "non-retryable API error");
                return Err(err.with_attempts(ctx.attempt));
            }

            if !ctx.has_budget() {
                error!(
                    kind = %err.kind,
                    attempts = ctx.attempt,
                    "API call failed, retries exhausted"
                );
                return Err(err.with_attempts(ctx.attempt));
            }

            ctx.next_delay = self.delay_for(ctx.attempt);
            warn!(
                kind = %err.kind,
                attempt = ctx.attempt,
                max_attempts = ctx.max_attempts,
                delay_ms = ctx.next_delay.as_millis() as u64,
                "API call failed, retrying"
            );
            sleep(ctx.next_delay).await;
            ctx.attempt += 1;
        }
    }
}

/// Run `operation` under the default policy with a custom attempt budget.
pub async fn with_retry<T, E, F, Fut>(operation: F, max_attempts: u32) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ApiError>,
{
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_retry(operation)
        .await
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn failing(kind: ErrorKind, calls: Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<Result<(), ApiError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(ApiError::new(kind, "boom")))
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(64), Duration::from_millis(500));
    }

    #[test]
    fn test_with_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_uses_whole_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(failing(ErrorKind::RateLimited, calls.clone()), 3)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_reports_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(failing(ErrorKind::NetworkUnavailable, calls.clone()), 4)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("after 4 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_kinds_fail_immediately() {
        for kind in [
            ErrorKind::AuthenticationFailed,
            ErrorKind::AuthorizationInsufficient,
            ErrorKind::NotFound,
            ErrorKind::Unknown,
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let start = Instant::now();
            let err = with_retry(failing(kind, calls.clone()), 3).await.unwrap_err();

            assert_eq!(calls.load(Ordering::SeqCst), 1, "{:?} was retried", kind);
            assert_eq!(err.kind, kind);
            assert_eq!(err.attempts, 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_retried_when_opted_in() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().retry_unknown(true);
        let _ = policy
            .with_retry(failing(ErrorKind::Unknown, calls.clone()))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ApiError::new(ErrorKind::NetworkUnavailable, "reset"))
                    } else {
                        Ok(n)
                    }
                }
            },
            3,
        )
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_grow_exponentially() {
        let base = Duration::from_millis(250);
        let policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_base_delay(base);

        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = stamps.clone();
        let _ = policy
            .with_retry(move || {
                recorder.lock().unwrap().push(Instant::now());
                std::future::ready(Err::<(), _>(ApiError::new(ErrorKind::RateLimited, "slow down")))
            })
            .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 5);
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        for (n, gap) in gaps.iter().enumerate() {
            let expected = base * 2u32.pow(n as u32);
            let diff = gap.abs_diff(expected);
            assert!(diff <= Duration::from_millis(5), "gap {} was {:?}", n + 1, gap);
        }
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_policy_from_toml_uses_millis() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 5
            base_delay_ms = 200
            "#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, DEFAULT_MAX_DELAY);
        assert!(!policy.retry_unknown);
    }
}
