// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Exponential-backoff retry policy with mandatory jitter and
//! `Retry-After`/`retry-after-ms` honouring.
//!
//! Grounded in `az_http_policy_retry.c`: the delay calculation and the
//! retriable status-code set follow it exactly, and the jitter that source
//! only comments as intended (`0.8x to 1.3x`) is implemented here rather
//! than left out. As in the source, jitter applies only to the computed
//! exponential backoff; a server-supplied `Retry-After` delay is honoured
//! as-is, clamped but un-jittered.

use std::time::Duration;

use derive_builder::Builder;
use rand::Rng;

/// Status codes considered transient and therefore retriable by default.
pub const DEFAULT_RETRIABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Configuration for [`RetryPolicy`].
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct RetryPolicyOptions {
    /// Maximum number of attempts, including the first, before giving up.
    #[builder(default = "4")]
    pub max_retries: u32,
    /// Base delay in milliseconds before the first retry.
    #[builder(default = "4000")]
    pub retry_delay_msec: i64,
    /// Upper bound on the computed delay, before jitter.
    #[builder(default = "120_000")]
    pub max_retry_delay_msec: i64,
}

impl RetryPolicyOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_retries == Some(0) {
            return Err("max_retries must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicyOptions {
    fn default() -> Self {
        RetryPolicyOptionsBuilder::default().build().unwrap()
    }
}

/// Outcome of inspecting a failed response for retriability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether the caller should retry at all.
    pub should_retry: bool,
    /// Server-requested delay in milliseconds, if a `Retry-After` or
    /// `retry-after-ms`/`x-ms-retry-after-ms` header was present.
    pub server_delay_msec: Option<i64>,
}

/// The parts of an HTTP-like response the retry policy needs to decide
/// whether, and how long, to wait before reissuing a request.
///
/// Implemented over whatever response type a caller's HTTP client produces,
/// so this module stays decoupled from any one HTTP crate.
pub trait RetryableResponse {
    /// The response's status code.
    fn status_code(&self) -> u16;
    /// Look up a response header by name, case-insensitively.
    fn header(&self, name: &str) -> Option<String>;
}

/// Exponential backoff with mandatory 0.8x-1.3x jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: RetryPolicyOptions,
}

impl RetryPolicy {
    /// Build a policy from its options.
    #[must_use]
    pub fn new(options: RetryPolicyOptions) -> Self {
        Self { options }
    }

    /// The maximum number of attempts this policy allows.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.options.max_retries
    }

    /// Inspect a response's status code and headers to decide whether to
    /// retry and, if the server named a delay, what it was.
    ///
    /// `header` is looked up case-insensitively by the caller; this function
    /// takes pre-resolved header values to stay decoupled from any
    /// particular HTTP client's header map type.
    #[must_use]
    pub fn get_retry_after(
        status: u16,
        retry_after_ms_header: Option<&str>,
        retry_after_seconds_header: Option<&str>,
    ) -> RetryDecision {
        let should_retry = DEFAULT_RETRIABLE_STATUS_CODES.contains(&status);

        if let Some(ms) = retry_after_ms_header.and_then(|v| v.parse::<i64>().ok()) {
            let clamped = ms.min(i64::from(i32::MAX));
            return RetryDecision {
                should_retry,
                server_delay_msec: Some(clamped),
            };
        }

        if let Some(secs) = retry_after_seconds_header.and_then(|v| v.parse::<i64>().ok()) {
            let clamped = if secs < i64::from(i32::MAX) / 1000 {
                secs * 1000
            } else {
                i64::from(i32::MAX)
            };
            return RetryDecision {
                should_retry,
                server_delay_msec: Some(clamped),
            };
        }

        RetryDecision {
            should_retry,
            server_delay_msec: None,
        }
    }

    /// Compute the delay before attempt number `attempt` (0-indexed), clamped
    /// to `max_retry_delay_msec`.
    ///
    /// If `server_delay_msec` is `Some`, it takes precedence over the
    /// exponential calculation (the server's instruction always wins) and is
    /// used as-is, clamped but not jittered — only the computed exponential
    /// backoff gets the 0.8x-1.3x jitter, matching
    /// `_az_http_policy_retry_calc_delay`'s comment.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32, server_delay_msec: Option<i64>) -> Duration {
        if let Some(server_delay_msec) = server_delay_msec {
            let clamped = server_delay_msec.min(self.options.max_retry_delay_msec).max(0);
            log::debug!("retry attempt {attempt}: delaying {clamped}ms (server-supplied)");
            #[allow(clippy::cast_sign_loss)]
            return Duration::from_millis(clamped as u64);
        }

        let exponent = 1i64.checked_shl(attempt).unwrap_or(i64::MAX);
        let base = self.options.retry_delay_msec.saturating_mul(exponent);
        let clamped = base.min(self.options.max_retry_delay_msec).max(0);

        let jitter = rand::thread_rng().gen_range(0.8..=1.3);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered_ms = (clamped as f64 * jitter).round() as u64;
        log::debug!("retry attempt {attempt}: delaying {jittered_ms}ms (base {clamped}ms)");
        Duration::from_millis(jittered_ms)
    }

    /// Drive `issue` (one attempt at the underlying request) through this
    /// policy: reissue on a retriable status, honouring `Retry-After`/
    /// `retry-after-ms` headers and otherwise the exponential backoff, up to
    /// `max_retries` attempts. Mirrors `_az_http_policy_retry`'s loop:
    /// clear/reissue, inspect, sleep, repeat.
    ///
    /// # Errors
    /// Returns whatever error `issue` itself returns; a non-retriable or
    /// exhausted-retries response is returned to the caller as `Ok`, not an
    /// error, matching the source's "even 429/503 is `AZ_OK`" behaviour.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut issue: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        T: RetryableResponse,
    {
        let mut attempt = 0u32;
        loop {
            let response = issue().await?;

            if attempt + 1 >= self.options.max_retries {
                return Ok(response);
            }

            let ms_header = response
                .header("retry-after-ms")
                .or_else(|| response.header("x-ms-retry-after-ms"));
            let seconds_header = response.header("retry-after");
            let decision = Self::get_retry_after(
                response.status_code(),
                ms_header.as_deref(),
                seconds_header.as_deref(),
            );

            if !decision.should_retry {
                return Ok(response);
            }

            let delay = self.calculate_delay(attempt, decision.server_delay_msec);
            attempt += 1;
            log::debug!("retry attempt {attempt}: reissuing request in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(408, true; "request timeout retriable")]
    #[test_case(429, true; "too many requests retriable")]
    #[test_case(500, true; "internal server error retriable")]
    #[test_case(503, true; "service unavailable retriable")]
    #[test_case(400, false; "bad request not retriable")]
    #[test_case(404, false; "not found not retriable")]
    fn status_code_retriability(status: u16, expected: bool) {
        let decision = RetryPolicy::get_retry_after(status, None, None);
        assert_eq!(decision.should_retry, expected);
    }

    #[test]
    fn retry_after_ms_header_takes_precedence_and_clamps() {
        let decision = RetryPolicy::get_retry_after(503, Some("5000"), Some("1"));
        assert_eq!(decision.server_delay_msec, Some(5000));
    }

    #[test]
    fn retry_after_seconds_is_converted_to_millis() {
        let decision = RetryPolicy::get_retry_after(503, None, Some("2"));
        assert_eq!(decision.server_delay_msec, Some(2000));
    }

    #[test]
    fn retry_after_seconds_clamps_at_i32_max_boundary() {
        let huge_seconds = (i64::from(i32::MAX) / 1000 + 1).to_string();
        let decision = RetryPolicy::get_retry_after(503, None, Some(&huge_seconds));
        assert_eq!(decision.server_delay_msec, Some(i64::from(i32::MAX)));
    }

    #[test]
    fn delay_grows_exponentially_and_is_clamped() {
        let policy = RetryPolicy::new(
            RetryPolicyOptionsBuilder::default()
                .retry_delay_msec(1000i64)
                .max_retry_delay_msec(5000i64)
                .build()
                .unwrap(),
        );
        for attempt in 0..10 {
            let delay = policy.calculate_delay(attempt, None);
            // jitter is 0.8x-1.3x of the clamped base, so upper bound is 5000*1.3
            assert!(delay.as_millis() <= 6500);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            RetryPolicyOptionsBuilder::default()
                .retry_delay_msec(1000i64)
                .max_retry_delay_msec(1000i64)
                .build()
                .unwrap(),
        );
        for _ in 0..200 {
            let delay = policy.calculate_delay(0, None).as_millis();
            assert!((800..=1300).contains(&delay));
        }
    }

    struct FakeResponse {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
    }

    impl RetryableResponse for FakeResponse {
        fn status_code(&self) -> u16 {
            self.status
        }
        fn header(&self, name: &str) -> Option<String> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| (*v).to_string())
        }
    }

    // Spec scenario 6: a 503 with `retry-after-ms: 1500` sleeps once for
    // 1500ms, reissues, and the second attempt's 200 is returned as success.
    #[tokio::test(start_paused = true)]
    async fn honours_retry_after_ms_header_then_succeeds() {
        let policy = RetryPolicy::default();
        let mut attempts = 0u32;
        let start = tokio::time::Instant::now();

        let result: Result<FakeResponse, ()> = policy
            .execute_with_retry(|| {
                attempts += 1;
                let this_attempt = attempts;
                async move {
                    if this_attempt == 1 {
                        Ok(FakeResponse {
                            status: 503,
                            headers: vec![("retry-after-ms", "1500")],
                        })
                    } else {
                        Ok(FakeResponse { status: 200, headers: vec![] })
                    }
                }
            })
            .await;

        let response = result.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(attempts, 2);
        // A server-supplied delay is honoured exactly, not jittered.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn non_retriable_status_returns_on_first_attempt() {
        let policy = RetryPolicy::default();
        let mut attempts = 0u32;

        let result: Result<FakeResponse, ()> = policy
            .execute_with_retry(|| {
                attempts += 1;
                async move { Ok(FakeResponse { status: 404, headers: vec![] }) }
            })
            .await;

        assert_eq!(result.unwrap().status, 404);
        assert_eq!(attempts, 1);
    }
}
