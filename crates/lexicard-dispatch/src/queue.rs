//! Unbounded FIFO of pending work with wake-on-push.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::unit::WorkUnit;

/// Multi-producer queue drained by the single dispatch loop.
///
/// `push` never blocks. A push made while the consumer is not waiting leaves
/// a stored wake-up permit, so the next `wait_for_work` returns immediately
/// and no wake-up is lost between an empty `try_pop` and the wait.
#[derive(Debug, Default)]
pub struct WorkQueue {
    units: Mutex<VecDeque<Arc<WorkUnit>>>,
    available: Notify,
}

impl WorkQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit at the tail and wakes the consumer.
    pub fn push(&self, unit: Arc<WorkUnit>) {
        self.units.lock().push_back(unit);
        self.available.notify_one();
    }

    /// Removes the head unit, if any.
    pub fn try_pop(&self) -> Option<Arc<WorkUnit>> {
        self.units.lock().pop_front()
    }

    /// Suspends until a push happens (or already happened since the last
    /// wait).
    pub async fn wait_for_work(&self) {
        self.available.notified().await;
    }

    /// Whether no unit is queued.
    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    /// Number of queued units.
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn unit(word: &str) -> Arc<WorkUnit> {
        Arc::new(WorkUnit::page(&format!("https://dict.example/{word}_1"), |_| {}).unwrap())
    }

    #[test]
    fn units_come_out_in_fifo_order() {
        let queue = WorkQueue::new();
        let first = unit("a");
        let second = unit("b");

        queue.push(first.clone());
        queue.push(second.clone());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop().unwrap().id(), first.id());
        assert_eq!(queue.try_pop().unwrap().id(), second.id());
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let queue = WorkQueue::new();
        queue.push(unit("a"));

        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_work())
            .await
            .expect("stored permit should wake the waiter");
    }

    #[tokio::test]
    async fn waiter_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_work().await })
        };

        tokio::task::yield_now().await;
        queue.push(unit("a"));

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }
}
