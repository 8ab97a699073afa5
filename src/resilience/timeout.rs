//! Deadline enforcement for protected operations.
//!
//! On expiry the inner future is dropped, so nothing it would have done after
//! the deadline (cache writes, counter updates) can happen. A driver that keeps
//! working in the background is abandoned, not cancelled.

use crate::error::{ResilienceError, Result};
use std::future::Future;
use std::time::Duration;

/// Await `operation` for at most `limit`, mapping expiry to `ResilienceError::Timeout`
pub async fn with_timeout<T, Fut>(operation: &str, limit: Duration, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::debug!(
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "Operation abandoned at deadline"
            );
            Err(ResilienceError::timeout(operation, limit))
        }
    }
}
