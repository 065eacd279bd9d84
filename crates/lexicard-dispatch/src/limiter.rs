//! Concurrency cap on executing units.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{DispatchError, Result};

/// Counting semaphore with a fixed capacity.
///
/// A [`Slot`] is held for the whole execution of a unit and released when it
/// drops, so a panicking continuation still gives its slot back.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Permission for one unit to execute.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Creates a limiter allowing `capacity` concurrent executions.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ConfigurationError` when `capacity` is zero or
    /// larger than the semaphore supports.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DispatchError::configuration("concurrency capacity must be at least 1"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(DispatchError::configuration(format!(
                "concurrency capacity {capacity} exceeds {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self { permits: Arc::new(Semaphore::new(capacity)), capacity })
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownRequested` if the limiter was closed.
    pub async fn acquire(&self) -> Result<Slot> {
        let permit =
            self.permits.clone().acquire_owned().await.map_err(|_| DispatchError::ShutdownRequested)?;
        Ok(Slot { _permit: permit })
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops handing out slots. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            ConcurrencyLimiter::new(0),
            Err(DispatchError::ConfigurationError { .. })
        ));
    }

    #[tokio::test]
    async fn slots_are_returned_on_drop() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();

        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(blocked.is_err(), "third acquire must wait at capacity");

        drop(first);
        assert_eq!(limiter.in_flight(), 1);

        let third = tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .unwrap()
            .unwrap();
        drop((second, third));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_limiter_refuses_acquire() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        limiter.close();
        assert!(matches!(limiter.acquire().await, Err(DispatchError::ShutdownRequested)));
    }
}
