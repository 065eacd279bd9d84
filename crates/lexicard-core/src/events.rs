//! Event vocabulary for observing units as they move through the dispatcher.
//!
//! The dispatcher publishes a [`DispatchEvent`] at every lifecycle step of a
//! work unit and at every throttle transition. Subscribers implement
//! [`EventHandler`]; the dispatcher never knows who is listening.
//!
//! ```text
//!                 AttemptStarted / Delivered / Skipped
//! ┌─────────────────┐   RetryScheduled / Failed     ┌────────────────────┐
//! │ Dispatcher      │ ─────────────────────────────▶│ MulticastHandler   │
//! │ continuations   │   ThrottleEngaged / Reset     │ (fan-out)          │
//! └─────────────────┘                               └────────────────────┘
//!                                                            │
//!                                                            ▼
//!                                                  progress reporting,
//!                                                  test instrumentation
//! ```
//!
//! Handlers run inside the unit's completion continuation, outside every
//! dispatcher lock, so a slow handler delays only its own unit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{UnitId, UnitKindLabel};

/// Events emitted by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// A unit was handed to the transport.
    AttemptStarted(UnitEvent),

    /// A unit succeeded and its result handler ran.
    Delivered(UnitEvent),

    /// The remote permanently rejected a unit; it was dropped.
    Skipped(UnitEvent),

    /// A unit failed transiently and went back to the tail of the queue.
    RetryScheduled {
        /// The attempt that failed.
        event: UnitEvent,
        /// Retries left after this one was consumed.
        remaining_retries: u32,
    },

    /// A unit exhausted its retry budget.
    Failed {
        /// The final attempt.
        event: UnitEvent,
        /// Description of the last failure.
        error_message: String,
    },

    /// Remote distress observed; dispatch slows down.
    ThrottleEngaged {
        /// Consecutive distress signals seen so far.
        consecutive_failures: u32,
    },

    /// A healthy response cleared the throttle.
    ThrottleReset,
}

impl DispatchEvent {
    /// The unit this event is about, if any.
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            Self::AttemptStarted(event) | Self::Delivered(event) | Self::Skipped(event) => {
                Some(event.unit_id)
            },
            Self::RetryScheduled { event, .. } | Self::Failed { event, .. } => Some(event.unit_id),
            Self::ThrottleEngaged { .. } | Self::ThrottleReset => None,
        }
    }
}

/// Per-unit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEvent {
    /// Stable identity of the unit across retries.
    pub unit_id: UnitId,

    /// Which kind of work the unit performs.
    pub kind: UnitKindLabel,

    /// Target URL.
    pub url: String,

    /// 1-based attempt number this event refers to.
    pub attempt_number: u32,

    /// HTTP status, when the remote answered.
    pub response_status: Option<u16>,

    /// When the event was observed.
    pub occurred_at: DateTime<Utc>,
}

/// Trait for reacting to dispatcher events.
///
/// Implementations must not block for long and must not panic; event
/// handling never feeds back into dispatch decisions.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a dispatcher event.
    async fn handle_event(&self, event: DispatchEvent);
}

/// Event handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DispatchEvent) {}
}

/// Forwards every event to all registered subscribers concurrently.
#[derive(Debug, Clone)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a new multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for MulticastEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingHandler {
        event_count: Arc<AtomicUsize>,
    }

    impl CountingHandler {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let counter = Arc::new(AtomicUsize::new(0));
            (Self { event_count: counter.clone() }, counter)
        }
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: DispatchEvent) {
            self.event_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn delivered_event() -> DispatchEvent {
        DispatchEvent::Delivered(UnitEvent {
            unit_id: UnitId::new(),
            kind: UnitKindLabel::PageFetch,
            url: "https://example.com/definition/english/run_1".to_string(),
            attempt_number: 1,
            response_status: Some(200),
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn no_op_handler_discards_events() {
        NoOpEventHandler::new().handle_event(delivered_event()).await;
    }

    #[tokio::test]
    async fn multicast_handler_forwards_to_all_subscribers() {
        let mut multicast = MulticastEventHandler::new();

        let (handler1, counter1) = CountingHandler::new();
        let (handler2, counter2) = CountingHandler::new();
        multicast.add_subscriber(Arc::new(handler1));
        multicast.add_subscriber(Arc::new(handler2));

        assert_eq!(multicast.subscriber_count(), 2);

        multicast.handle_event(delivered_event()).await;

        assert_eq!(counter1.load(Ordering::SeqCst), 1);
        assert_eq!(counter2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throttle_events_carry_no_unit() {
        assert_eq!(DispatchEvent::ThrottleReset.unit_id(), None);
        assert!(delivered_event().unit_id().is_some());
    }
}
