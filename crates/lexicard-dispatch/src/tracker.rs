//! Outstanding-work accounting and drain detection.
//!
//! The tracker counts units that are either queued or executing. A unit is
//! counted from the moment it is enqueued until the end of the continuation
//! of its final attempt. A retry increments for the re-enqueue before the
//! failed attempt decrements, so the count never reads zero while the unit
//! is still alive.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Notify;

use crate::queue::WorkQueue;

/// Counter of queued plus executing units with a drain notification.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    outstanding: AtomicUsize,
    changed: Notify,
}

/// Decrements the tracker when dropped.
///
/// Held by every attempt continuation so the decrement happens even if the
/// continuation panics.
#[derive(Debug)]
pub struct CompletionGuard {
    tracker: Arc<CompletionTracker>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

impl CompletionTracker {
    /// Creates a tracker with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more unit. Returns the new count.
    pub fn increment(&self) -> usize {
        self.outstanding.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Counts one unit as finished and wakes every drain waiter. Returns the
    /// new count.
    pub fn decrement(&self) -> usize {
        let remaining = match self.outstanding.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |value| value.checked_sub(1),
        ) {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::error!("completion tracker decremented below zero");
                0
            },
        };

        self.changed.notify_waiters();
        remaining
    }

    /// Returns a guard that decrements on drop.
    pub fn guard(self: &Arc<Self>) -> CompletionGuard {
        CompletionGuard { tracker: self.clone() }
    }

    /// Units currently queued or executing.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Suspends until nothing is outstanding and `queue` is empty.
    ///
    /// Wakes on every decrement and also re-checks every `recheck_interval`
    /// so a missed wake-up only delays the return.
    pub async fn wait_for_drain(&self, queue: &WorkQueue, recheck_interval: Duration) {
        self.wait_until(|| self.outstanding() == 0 && queue.is_empty(), recheck_interval).await;
    }

    /// Suspends until `done` returns `true`, re-evaluating it after every
    /// decrement and at least every `recheck_interval`.
    pub async fn wait_until(&self, mut done: impl FnMut() -> bool, recheck_interval: Duration) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done() {
                return;
            }

            let _ = tokio::time::timeout(recheck_interval, notified).await;
        }
    }
}
