//! Pacing and exponential backoff for outbound requests.

use std::future::Future;
use std::time::Duration;

use survey_core::{Error, Result};
use tokio::time::sleep;

/// Number of retries after the first throttled attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How requests are paced and how throttling is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before every request; also the first backoff step.
    pub base_delay: Duration,
    /// Retries allowed after the first throttled attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// What one call through [`RetryPolicy::run`] cost in attempts and waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Requests sent, including the successful one.
    pub attempts: u32,
    /// Total time slept between attempts, excluding the initial pacing delay.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy with the given base delay and the default retry count.
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0-based): `base * 2^retry`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `operation` after the pacing delay, retrying while it reports throttling.
    ///
    /// Non-retryable errors are returned at once. Once the retries are spent a
    /// throttled request becomes [`Error::RateLimitExhausted`].
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> (RetryStats, Result<T>)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if !self.base_delay.is_zero() {
            sleep(self.base_delay).await;
        }

        let mut stats = RetryStats::default();
        loop {
            stats.attempts += 1;
            match operation().await {
                Ok(value) => return (stats, Ok(value)),
                Err(error) if error.is_retryable() => {
                    let retry = stats.attempts - 1;
                    if retry >= self.max_retries {
                        tracing::warn!(attempts = stats.attempts, %error, "Giving up after repeated throttling");
                        return (
                            stats,
                            Err(Error::RateLimitExhausted {
                                attempts: stats.attempts,
                            }),
                        );
                    }
                    let delay = self.backoff_delay(retry);
                    tracing::warn!(
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Rate limit exceeded, retrying after backoff"
                    );
                    sleep(delay).await;
                    stats.backoff += delay;
                }
                Err(error) => return (stats, Err(error)),
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::with_base_delay(BASE);
        assert_eq!(policy.backoff_delay(0), BASE);
        assert_eq!(policy.backoff_delay(1), BASE * 2);
        assert_eq!(policy.backoff_delay(2), BASE * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_throttles_then_success() {
        let policy = RetryPolicy::with_base_delay(BASE);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let (stats, result) = policy
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= 3 {
                        Err(Error::Throttled("slow down".to_owned()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok("done")));
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.backoff, BASE + BASE * 2 + BASE * 4);
        assert_eq!(start.elapsed(), BASE + stats.backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let policy = RetryPolicy::with_base_delay(BASE);
        let (stats, result) = policy
            .run(|| async { Err::<(), _>(Error::Throttled("slow down".to_owned())) })
            .await;

        assert!(matches!(result, Err(Error::RateLimitExhausted { attempts: 4 })));
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.backoff, BASE * 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_fail_immediately() {
        let policy = RetryPolicy::with_base_delay(BASE);
        let (stats, result) = policy
            .run(|| async {
                Err::<(), _>(Error::Upstream {
                    status: 400,
                    message: "bad request".to_owned(),
                })
            })
            .await;

        assert!(matches!(result, Err(Error::Upstream { status: 400, .. })));
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.backoff, Duration::ZERO);
    }
}
