//! Event recording for assertions on dispatcher behaviour.

use std::time::Duration;

use lexicard_core::{DispatchEvent, EventHandler};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default timeout when waiting for events in tests.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Records every event it receives, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<DispatchEvent>>,
    notify: Notify,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().clone()
    }

    /// Number of events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DispatchEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    /// Waits until at least `count` events match `predicate`.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn wait_for(&self, count: usize, predicate: impl Fn(&DispatchEvent) -> bool) {
        let result = tokio::time::timeout(DEFAULT_EVENT_TIMEOUT, async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.count(&predicate) >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;

        assert!(
            result.is_ok(),
            "expected {count} matching events within {DEFAULT_EVENT_TIMEOUT:?}, saw {}",
            self.count(&predicate)
        );
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}
