//! Utility modules.

pub mod retry;

pub use retry::{RetryPolicy, RetryResult, Retryable, with_retry};
