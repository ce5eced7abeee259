//! Bounded retry for transient storage failures.

use crate::{ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::Duration;

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Constant delay between attempts.
    Fixed,
    /// Delay doubles after every failed attempt.
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first try.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff shape.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, `attempt` counting from 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => {
                let pow = attempt.saturating_sub(1).min(16);
                self.base_delay_ms.saturating_mul(1u64 << pow)
            },
        };
        Duration::from_millis(millis)
    }
}

/// Retry a fallible async operation while it fails with retriable errors.
///
/// Non-retriable errors and attempt exhaustion return the last error
/// unchanged; cancellation is checked before every attempt and during
/// every backoff sleep.
pub async fn retry_async<T, F, Fut>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        ctx.ensure_not_cancelled(operation)?;

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.class.is_retriable() || attempt >= policy.max_attempts {
                    return Err(error);
                }
                tokio::select! {
                    () = ctx.cancelled() => {
                        return Err(ErrorEnvelope::cancelled("operation cancelled")
                            .with_metadata("operation", operation));
                    }
                    () = tokio::time::sleep(policy.delay_for(attempt)) => {}
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_until_success() -> Result<()> {
        let ctx = RequestContext::new_op();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1,
            backoff: Backoff::Fixed,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);

        let value = retry_async(&ctx, policy, "test", || {
            let calls = Arc::clone(&calls_in_op);
            async move {
                let attempt = calls.fetch_add(1, Ordering::Relaxed) + 1;
                if attempt < 3 {
                    Err(ErrorEnvelope::transient("flaky"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await?;

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        Ok(())
    }

    #[tokio::test]
    async fn non_retriable_errors_fail_fast() {
        let ctx = RequestContext::new_op();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);

        let result: Result<()> = retry_async(&ctx, RetryPolicy::default(), "test", || {
            let calls = Arc::clone(&calls_in_op);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(ErrorEnvelope::expected(
                    ErrorCode::not_found(),
                    "no such object",
                ))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            backoff: Backoff::Exponential,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
