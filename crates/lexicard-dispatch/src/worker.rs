//! Dispatch loop and per-attempt continuations.
//!
//! The loop is the single consumer of the work queue. Per iteration it:
//!
//! 1. sleeps the throttle backoff when the throttle is engaged;
//! 2. acquires a concurrency slot;
//! 3. pops a unit, or gives the slot back and waits for a push when the queue
//!    is empty;
//! 4. spawns the attempt with the slot, which is released when the attempt
//!    finishes.
//!
//! The attempt task performs the request and then classifies the outcome,
//! updates the throttle, re-enqueues or fails the unit, and finally releases
//! its slot and its tracker count, in that order.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use lexicard_core::{Classification, Clock, DispatchEvent, EventHandler, UnitEvent};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{FetchResponse, Transport},
    engine::DispatchStats,
    error::{DispatchError, ErrorCategory},
    failed::FailedWork,
    limiter::{ConcurrencyLimiter, Slot},
    queue::WorkQueue,
    throttle::ThrottleController,
    tracker::CompletionTracker,
    unit::WorkUnit,
};

/// State shared by the dispatcher handle, the loop and every attempt task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queue: WorkQueue,
    pub(crate) limiter: ConcurrencyLimiter,
    pub(crate) throttle: ThrottleController,
    pub(crate) tracker: Arc<CompletionTracker>,
    pub(crate) failed: FailedWork,
    pub(crate) executing: AtomicUsize,
    pub(crate) stats: Mutex<DispatchStats>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_handler: Arc<dyn EventHandler>,
}

impl Shared {
    /// Runs one attempt of `unit` to completion, including all bookkeeping.
    async fn run_attempt(&self, unit: &Arc<WorkUnit>) {
        let attempt = unit.begin_attempt();
        self.emit(DispatchEvent::AttemptStarted(self.unit_event(unit, attempt, None))).await;
        debug!(attempt, "attempt started");

        match self.transport.execute(unit.to_request(attempt)).await {
            Ok(response) => self.handle_response(unit, attempt, response).await,
            Err(error) => {
                warn!(attempt, error = %error, "transport failure");
                self.retry_or_fail(unit, attempt, None, error).await;
            },
        }
    }

    async fn handle_response(&self, unit: &Arc<WorkUnit>, attempt: u32, response: FetchResponse) {
        let status = response.status_code;
        let classification = unit.classify(status);

        debug!(attempt, status, classification = %classification, "response classified");

        match classification {
            Classification::Success => {
                self.clear_throttle().await;

                match unit.deliver(response.body).await {
                    Ok(()) => {
                        self.stats.lock().delivered += 1;
                        info!(attempt, status, "unit delivered");
                        self.emit(DispatchEvent::Delivered(self.unit_event(
                            unit,
                            attempt,
                            Some(status),
                        )))
                        .await;
                    },
                    Err(error) => {
                        warn!(attempt, error = %error, "result handling failed");
                        self.retry_or_fail(unit, attempt, Some(status), error).await;
                    },
                }
            },
            Classification::PermanentSkip => {
                self.clear_throttle().await;
                self.stats.lock().skipped += 1;
                info!(attempt, status, "remote rejected unit permanently, skipping");
                self.emit(DispatchEvent::Skipped(self.unit_event(unit, attempt, Some(status))))
                    .await;
            },
            Classification::RetryableCritical | Classification::RetryableOther => {
                let error = if classification.is_distress() {
                    let retry_after_seconds = response.retry_after_seconds();
                    let consecutive_failures = self.throttle.record_distress();
                    warn!(
                        attempt,
                        status,
                        consecutive_failures,
                        retry_after_seconds = ?retry_after_seconds,
                        "remote distress, throttling dispatch"
                    );
                    self.emit(DispatchEvent::ThrottleEngaged { consecutive_failures }).await;
                    DispatchError::from_status(status, retry_after_seconds)
                } else {
                    DispatchError::unexpected_status(status)
                };
                self.retry_or_fail(unit, attempt, Some(status), error).await;
            },
        }
    }

    async fn clear_throttle(&self) {
        if self.throttle.record_recovery() {
            info!("remote recovered, throttle cleared");
            self.emit(DispatchEvent::ThrottleReset).await;
        }
    }

    /// Re-enqueues `unit` at the tail if its budget allows, otherwise moves
    /// it to the failed set.
    async fn retry_or_fail(
        &self,
        unit: &Arc<WorkUnit>,
        attempt: u32,
        response_status: Option<u16>,
        error: DispatchError,
    ) {
        unit.record_error(error.clone());
        let category = ErrorCategory::from(&error);

        if error.is_retryable() && unit.should_retry() {
            let remaining_retries = unit.decrement_retries();
            self.stats.lock().retried += 1;

            debug!(
                attempt,
                remaining_retries,
                category = %category,
                error = %error,
                "re-enqueueing unit"
            );
            self.emit(DispatchEvent::RetryScheduled {
                event: self.unit_event(unit, attempt, response_status),
                remaining_retries,
            })
            .await;

            self.tracker.increment();
            self.queue.push(unit.clone());
            return;
        }

        let error_message = if error.is_retryable() {
            format!("{}: {error}", DispatchError::retries_exhausted(attempt))
        } else {
            error.to_string()
        };

        self.failed.push(unit.clone());
        self.stats.lock().failed += 1;
        error!(attempt, category = %category, error = %error_message, "unit failed permanently");
        self.emit(DispatchEvent::Failed {
            event: self.unit_event(unit, attempt, response_status),
            error_message,
        })
        .await;
    }

    fn unit_event(
        &self,
        unit: &WorkUnit,
        attempt_number: u32,
        response_status: Option<u16>,
    ) -> UnitEvent {
        UnitEvent {
            unit_id: unit.id(),
            kind: unit.kind(),
            url: unit.url().to_string(),
            attempt_number,
            response_status,
            occurred_at: DateTime::<Utc>::from(self.clock.now_system()),
        }
    }

    async fn emit(&self, event: DispatchEvent) {
        self.event_handler.handle_event(event).await;
    }
}

/// The single control task pulling units off the queue.
pub(crate) struct DispatchLoop {
    shared: Arc<Shared>,
    cancellation_token: CancellationToken,
}

impl DispatchLoop {
    pub(crate) fn new(shared: Arc<Shared>, cancellation_token: CancellationToken) -> Self {
        Self { shared, cancellation_token }
    }

    /// Runs until the cancellation token fires.
    pub(crate) async fn run(self) {
        info!(capacity = self.shared.limiter.capacity(), "dispatch loop starting");

        loop {
            if let Some(backoff) = self.shared.throttle.current_backoff() {
                debug!(backoff_ms = backoff.as_millis(), "throttled, backing off");
                tokio::select! {
                    () = self.shared.clock.sleep(backoff) => {},
                    () = self.cancellation_token.cancelled() => break,
                }
            }

            let slot = tokio::select! {
                slot = self.shared.limiter.acquire() => match slot {
                    Ok(slot) => slot,
                    Err(error) => {
                        debug!(error = %error, "concurrency limiter closed");
                        break;
                    },
                },
                () = self.cancellation_token.cancelled() => break,
            };

            let unit = match self.shared.queue.try_pop() {
                Some(unit) => unit,
                None => {
                    drop(slot);
                    tokio::select! {
                        () = self.shared.queue.wait_for_work() => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                    continue;
                },
            };

            self.launch(unit, slot);
        }

        info!("dispatch loop stopped");
    }

    fn launch(&self, unit: Arc<WorkUnit>, slot: Slot) {
        self.shared.stats.lock().dispatched += 1;

        let shared = self.shared.clone();
        let completion = shared.tracker.guard();
        let executing = ExecutingGuard::new(shared.clone());
        let span = info_span!("attempt", unit_id = %unit.id(), kind = %unit.kind(), url = %unit.url());

        tokio::spawn(
            async move {
                // Drops in reverse order: the slot is released and the attempt
                // stops counting as executing before the tracker is
                // decremented.
                let _completion = completion;
                let _executing = executing;
                let _slot = slot;
                shared.run_attempt(&unit).await;
            }
            .instrument(span),
        );
    }
}

/// Counts one attempt as executing until dropped.
struct ExecutingGuard {
    shared: Arc<Shared>,
}

impl ExecutingGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.executing.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.shared.executing.fetch_sub(1, Ordering::AcqRel);
    }
}
