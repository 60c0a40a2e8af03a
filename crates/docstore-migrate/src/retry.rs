//! Bounded retry with backoff.
//!
//! Batch writes use exponential backoff (`min(base * 2^(attempt-1), cap)`);
//! orchestrator steps use linear backoff (`attempt * base`).

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Exponential,
    Linear,
}

/// Retry limits and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Exponential schedule capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Linear schedule, `attempt * base_delay`.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::MAX,
            backoff: Backoff::Linear,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// Batch write defaults: 3 attempts, 1s base, 10s cap.
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(10))
    }
}

/// The last error after retries ran out (or a non-retryable error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// Attempts actually made.
    pub attempts: u32,
    pub error: E,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt limit is reached. `op` receives the 1-based attempt number.
///
/// Returns the value and the number of attempts it took.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: R,
    mut op: F,
) -> Result<(T, u32), Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed: {} (retrying in {:?})",
                    label, attempt, max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_schedule_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(&RetryPolicy::default(), "write", |_: &String| true, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("failure {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok((3, 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_attempt_limit() {
        let result: Result<((), u32), _> =
            retry(&RetryPolicy::default(), "write", |_: &String| true, |attempt| async move {
                Err(format!("failure {}", attempt))
            })
            .await;
        assert_eq!(
            result,
            Err(Exhausted {
                attempts: 3,
                error: "failure 3".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let start = tokio::time::Instant::now();
        let result: Result<((), u32), _> = retry(
            &RetryPolicy::default(),
            "write",
            |e: &String| e != "duplicate",
            |_| async { Err("duplicate".to_string()) },
        )
        .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
