//! Retry utilities with exponential backoff.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy injected into every retrying call.
///
/// `max_attempts == 0` means "retry until success": the loop never gives up
/// and only ends when the operation succeeds or the enclosing task is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, 0 for unlimited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier (delay *= multiplier after each retry).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Create a bounded policy with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Retry forever, immediately, without backoff.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = millis(delay);
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = millis(delay);
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        !self.is_unbounded() && attempts >= self.max_attempts
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let max = self.max_delay();
        let scaled = (delay.as_secs_f64() * self.multiplier.max(1.0)).min(max.as_secs_f64());
        Duration::try_from_secs_f64(scaled).map_or(max, |d| d.min(max))
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Retry result indicating what happened.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed after all retries.
    Failed { last_error: E, attempts: u32 },
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the operation should be retried.
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation under `policy`, logging every failed attempt.
///
/// `operation_name` only shows up in the log lines.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts: u32 = 0;
    let mut delay = policy.initial_delay();

    loop {
        attempts = attempts.saturating_add(1);

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(operation = operation_name, attempts, "succeeded after retry");
                }
                return RetryResult::Success(value);
            }
            Err(error) => {
                if !error.is_retryable() || policy.exhausted(attempts) {
                    tracing::error!(
                        operation = operation_name,
                        attempts,
                        error = %error,
                        "giving up"
                    );
                    return RetryResult::Failed {
                        last_error: error,
                        attempts,
                    };
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt = attempts,
                    error = %error,
                    "error during {operation_name}, retrying"
                );

                if !delay.is_zero() {
                    // Add some jitter to avoid thundering herd
                    let jitter_ms = rand_jitter(millis(delay) / 4);
                    sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay = policy.next_delay(delay);
                } else {
                    // Immediate retry still yields so a dead backend cannot starve the runtime.
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

/// Generate a random jitter value.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    seed % max
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0.contains("transient")
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(3), "op", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>("success")
        })
        .await;

        match result {
            RetryResult::Success(v) => assert_eq!(v, "success"),
            _ => panic!("expected success"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_retries() {
        let counter = AtomicU32::new(0);
        let result = with_retry(
            &RetryPolicy::new(3).with_initial_delay(Duration::from_millis(5)),
            "op",
            || async {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError("transient error".to_string()))
                } else {
                    Ok("success")
                }
            },
        )
        .await;

        match result {
            RetryResult::Success(v) => assert_eq!(v, "success"),
            _ => panic!("expected success"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(3), "op", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError("permanent error".to_string()))
        })
        .await;

        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 1),
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = AtomicU32::new(0);
        let result = with_retry(
            &RetryPolicy::new(3).with_initial_delay(Duration::from_millis(5)),
            "op",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError("transient error".to_string()))
            },
        )
        .await;

        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 3),
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unbounded_policy_keeps_going() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::unbounded(), "op", || async {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            if count < 50 {
                Err(TestError("transient error".to_string()))
            } else {
                Ok(count)
            }
        })
        .await;

        match result {
            RetryResult::Success(v) => assert_eq!(v, 50),
            RetryResult::Failed { last_error, .. } => panic!("unexpected failure: {last_error}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 51);
    }

    #[test]
    fn test_next_delay_is_capped() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(400))
            .with_max_delay(Duration::from_millis(1000));
        let d1 = policy.next_delay(policy.initial_delay());
        assert_eq!(d1, Duration::from_millis(800));
        assert_eq!(policy.next_delay(d1), Duration::from_millis(1000));
    }

    #[test]
    fn test_next_delay_survives_huge_multiplier() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5\nmultiplier = 1e300").unwrap();
        assert_eq!(policy.next_delay(policy.initial_delay()), policy.max_delay());

        let policy = RetryPolicy::new(5).with_multiplier(f64::INFINITY);
        assert_eq!(policy.next_delay(policy.initial_delay()), policy.max_delay());
    }

    #[test]
    fn test_delay_builders_saturate() {
        let policy = RetryPolicy::new(1)
            .with_initial_delay(Duration::MAX)
            .with_max_delay(Duration::MAX);
        assert_eq!(policy.initial_delay_ms, u64::MAX);
        assert_eq!(policy.max_delay_ms, u64::MAX);
    }

    #[test]
    fn test_policy_toml_defaults() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 0").unwrap();
        assert!(policy.is_unbounded());
        assert_eq!(policy.initial_delay_ms, 100);
    }
}
