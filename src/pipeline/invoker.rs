use std::future::Future;

use crate::error::StageError;
use crate::utils::{RetryPolicy, RetryResult, Retryable, with_retry};

/// Runs retrieval calls under a retry policy and maps exhaustion to
/// [`StageError::BackendUnavailable`].
///
/// Holds no state between calls: every `invoke` gets a fresh attempt budget.
#[derive(Debug, Clone, Default)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn invoke<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, StageError>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match with_retry(&self.policy, operation_name, operation).await {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed {
                last_error,
                attempts,
            } => Err(StageError::BackendUnavailable {
                attempts,
                last_error: last_error.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorStoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_invoke_exhaustion_is_backend_unavailable() {
        let invoker =
            RetryingInvoker::new(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1)));
        let calls = AtomicU32::new(0);
        let err = invoker
            .invoke("search", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(VectorStoreError::SearchError("down".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, StageError::BackendUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_each_invoke_has_its_own_budget() {
        let invoker =
            RetryingInvoker::new(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1)));
        for _ in 0..3 {
            let calls = AtomicU32::new(0);
            let value = invoker
                .invoke("search", || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(VectorStoreError::SearchError("flaky".to_string()))
                    } else {
                        Ok(7)
                    }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
    }
}
