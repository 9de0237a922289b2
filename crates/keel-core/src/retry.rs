//! Retry discipline for idempotent store mutations.

use std::future::Future;

use tracing::debug;

use crate::error::StoreError;

/// Retry `op` indefinitely while it fails with [`StoreError::Timeout`].
///
/// Only mutations the caller has declared idempotent may be wrapped in this:
/// a timed-out write may have committed, and the retry will observe (and must
/// tolerate) its own earlier effect. All non-timeout errors surface
/// immediately.
pub async fn retry_on_timeout<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    loop {
        match op().await {
            Err(StoreError::Timeout { duration_ms }) => {
                debug!(duration_ms, "store-timeout-retrying");
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let result = retry_on_timeout(|| async { Ok::<_, StoreError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn passes_through_non_timeout_errors() {
        let result = retry_on_timeout(|| async { Err::<(), _>(StoreError::not_found("k")) }).await;
        assert_eq!(result.unwrap_err(), StoreError::not_found("k"));
    }

    #[tokio::test]
    async fn retries_until_timeout_clears() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_on_timeout(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(StoreError::Timeout { duration_ms: 1 })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
