//! Exponential backoff retry for idempotent upstream GET calls.
//!
//! Only responses with status 429 or 5xx are retried. Transport errors are
//! returned to the caller at once, and so is every other status.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::{debug, warn};

/// Retry policy for upstream calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including server-supplied ones.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Statuses worth retrying: rate limiting and server-side failures.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Whether a response with `status` should be retried after `attempt`
    /// retries have already been made.
    pub fn should_retry(&self, attempt: u32, status: StatusCode) -> bool {
        attempt < self.max_retries && Self::is_retryable_status(status)
    }

    /// Backoff for the given retry number: `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next retry. A server-supplied `Retry-After` wins
    /// over the computed backoff on 429 responses.
    pub fn delay_for(
        &self,
        attempt: u32,
        status: StatusCode,
        retry_after: Option<Duration>,
    ) -> Duration {
        match retry_after {
            Some(hint) if status == StatusCode::TOO_MANY_REQUESTS => hint.min(self.max_delay),
            _ => self.backoff(attempt),
        }
    }

    /// Sends the request built by `send` until it yields a non-retryable
    /// response or retries are exhausted. The last response is returned
    /// whatever its status; mapping it to an error is up to the caller.
    pub async fn execute<F, Fut>(
        &self,
        operation: &str,
        mut send: F,
    ) -> Result<reqwest::Response, reqwest::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let response = send().await?;
            let status = response.status();

            if !self.should_retry(attempt, status) {
                if attempt > 0 {
                    if Self::is_retryable_status(status) {
                        warn!(
                            operation,
                            attempts = attempt + 1,
                            status = status.as_u16(),
                            "Max retries exceeded"
                        );
                    } else {
                        debug!(operation, attempts = attempt + 1, "Request settled after retries");
                    }
                }
                return Ok(response);
            }

            let delay = self.delay_for(attempt, status, parse_retry_after(response.headers()));
            debug!(
                operation,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                status = status.as_u16(),
                delay_ms = delay.as_millis() as u64,
                "Retrying after transient upstream status"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parses a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(RetryPolicy::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_should_retry_stops_at_max() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.should_retry(2, StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!policy.should_retry(3, StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!RetryPolicy::none().should_retry(0, StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_secs(1)); // capped
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_only_honoured_on_429() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10));
        let hint = Some(Duration::from_secs(2));

        assert_eq!(
            policy.delay_for(0, StatusCode::TOO_MANY_REQUESTS, hint),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for(0, StatusCode::SERVICE_UNAVAILABLE, hint),
            Duration::from_millis(100)
        );
        // Server hints are capped like everything else
        assert_eq!(
            policy.delay_for(0, StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(600))),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
