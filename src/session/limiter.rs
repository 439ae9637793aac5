//! Global in-flight request cap
//!
//! One [`InflightLimiter`] is shared by every session of a run. A session must
//! hold a permit for the full duration of a dispatch; the permit count is the
//! configured rate limit. Closing the limiter wakes all waiters so draining
//! sessions never hang on a permit that will not come.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of simultaneously in-flight requests across all sessions
#[derive(Debug)]
pub struct InflightLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl InflightLimiter {
    /// A limiter allowing `capacity` concurrent dispatches
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit; `None` once the limiter has been closed
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    /// Close the limiter, releasing every pending and future waiter
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// The configured cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_capped_at_capacity() {
        let limiter = InflightLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        // A third acquire must block until a permit returns.
        let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(blocked.is_err());

        drop(first);
        let third = tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let limiter = Arc::new(InflightLimiter::new(1));
        let _held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.close();

        let permit = tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(permit.is_none());
    }

    #[tokio::test]
    async fn test_acquire_after_close_returns_none() {
        let limiter = InflightLimiter::new(4);
        limiter.close();
        assert!(limiter.acquire().await.is_none());
    }
}
