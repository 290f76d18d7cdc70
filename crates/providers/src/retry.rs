//! Bounded retry with exponential backoff for provider calls.
//!
//! The policy is a trait so callers can inject a deterministic strategy.
//! Only retryable errors (see [`ProviderError::is_retryable`]) are retried.

use educore_config::RetryConfig;
use educore_core::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Decides whether, and after how long, a failed call is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the number of attempts already made (1 after the first
    /// failure). `None` means give up and surface `error`.
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration>;
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped, optionally jittered.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay);

        if !self.jitter {
            return delay;
        }

        // ±25% spread
        let spread = delay.as_millis() as f64 / 4.0;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
        let jittered = (delay.as_millis() as f64 + offset).max(0.0) as u64;
        Duration::from_millis(jittered).min(self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return None;
        }

        let delay = self.backoff(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                Some(delay.max(Duration::from_secs(*retry_after_secs)).min(self.max_delay))
            }
            _ => Some(delay),
        }
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &ProviderError) -> Option<Duration> {
        None
    }
}

/// Run `operation` until it succeeds or `policy` gives up.
pub async fn run_with_retry<T, F, Fut>(
    policy: &dyn RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.next_delay(attempt, &e) {
                Some(delay) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> ProviderError {
        ProviderError::Unavailable("down".into())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ExponentialBackoff::new(10, Duration::from_millis(100), Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(policy.next_delay(1, &unavailable()), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2, &unavailable()), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3, &unavailable()), Some(Duration::from_millis(350)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ExponentialBackoff::new(5, Duration::from_millis(400), Duration::from_secs(10));
        for _ in 0..50 {
            let delay = policy.next_delay(1, &unavailable()).unwrap();
            assert!(delay >= Duration::from_millis(300));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn gives_up_at_max_attempts_or_permanent_error() {
        let policy = ExponentialBackoff::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert!(policy.next_delay(2, &unavailable()).is_some());
        assert!(policy.next_delay(3, &unavailable()).is_none());
        assert!(
            policy
                .next_delay(1, &ProviderError::AuthenticationFailed("bad".into()))
                .is_none()
        );
    }

    #[test]
    fn rate_limit_hint_raises_delay() {
        let policy = ExponentialBackoff::new(3, Duration::from_millis(10), Duration::from_secs(8))
            .with_jitter(false);
        let delay = policy
            .next_delay(1, &ProviderError::RateLimited { retry_after_secs: 2 })
            .unwrap();
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = ExponentialBackoff::new(3, Duration::from_millis(500), Duration::from_secs(8));

        let result = run_with_retry(&policy, "synthesis", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(unavailable())
                } else {
                    Ok("answer")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_retry_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let policy = ExponentialBackoff::new(2, Duration::from_millis(100), Duration::from_secs(1));

        let result: Result<(), _> = run_with_retry(&policy, "synthesis", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout("slow".into())) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_retry_makes_single_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&NoRetry, "synthesis", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
