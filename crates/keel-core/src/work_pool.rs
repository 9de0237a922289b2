//! Bounded fan-out for batch store operations.
//!
//! Listings, batch CAS, and parallel retirement fan out one future per
//! record; against a large cluster that is thousands of concurrent store
//! calls. The pool caps in-flight work with a semaphore and tracks every
//! spawned task so a batch can be joined before its results are read.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default pool size for LRP listings and convergence fan-out.
pub const DEFAULT_LRP_POOL_SIZE: usize = 50;
/// Default pool size for task CAS batches.
pub const DEFAULT_TASK_POOL_SIZE: usize = 20;

/// A bounded pool of concurrent futures.
///
/// `submit` never blocks the caller beyond acquiring a permit; excess work
/// queues on the semaphore. `join_all` drains the pool and returns the
/// outputs of every submitted future (panicked tasks are dropped from the
/// result set).
pub struct WorkPool<T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkPool<T> {
    /// Create a pool allowing at most `size` futures in flight.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Submit a future; it starts once a permit is free.
    pub fn submit<F>(&mut self, work: F)
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = permits.acquire_owned().await;
            work.await
        });
    }

    /// Wait for every submitted future and collect the results.
    pub async fn join_all(mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(output) = joined {
                results.push(output);
            }
        }
        results
    }
}
