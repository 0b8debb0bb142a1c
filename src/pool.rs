//! Bounded worker pool
//!
//! Caps the number of simultaneous external calls across the whole batch.
//! A permit is held only for the duration of one call, never across a whole
//! message, so nested fan-out cannot starve itself.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by an outstanding call
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `call` once a permit is free; the permit is released when the
    /// call completes or is dropped (e.g. by a deadline).
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.permits.acquire().await.ok();
        debug!(available = self.available(), "Worker pool permit acquired");
        call.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_permit_released_after_call() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.available(), 2);

        let value = pool.run(async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_timeout() {
        let pool = WorkerPool::new(1);
        let slow = pool.run(tokio::time::sleep(Duration::from_secs(60)));
        let outcome = tokio::time::timeout(Duration::from_millis(5), slow).await;
        assert!(outcome.is_err());
        assert_eq!(pool.available(), 1);
    }
}
