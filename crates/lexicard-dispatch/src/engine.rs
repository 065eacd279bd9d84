//! Dispatcher handle: start, enqueue, drain, collect failures, shut down.
//!
//! # Architecture
//!
//! ```text
//! producers ──enqueue──▶ ┌────────────┐      ┌───────────────┐
//!                        │ WorkQueue  │─────▶│ DispatchLoop  │
//!      ┌────────────────▶└────────────┘      └───────────────┘
//!      │ retry                                  │ throttle sleep
//!      │                                        │ acquire slot
//!      │                                        ▼
//! ┌──────────────────┐    spawn per unit   ┌───────────────┐
//! │ attempt task     │◀────────────────────│ Transport     │
//! │ classify, update │                     └───────────────┘
//! │ throttle, retry  │──fail──▶ FailedWork
//! └──────────────────┘
//!      │ release slot, decrement
//!      ▼
//! CompletionTracker ──wake──▶ wait_for_drain()
//! ```

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use lexicard_core::{Clock, EventHandler, NoOpEventHandler, RealClock, UnitId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    client::{ClientConfig, HttpTransport, Transport},
    error::{DispatchError, Result},
    failed::FailedWork,
    limiter::ConcurrencyLimiter,
    queue::WorkQueue,
    throttle::{ThrottleConfig, ThrottleController, ThrottleState},
    tracker::CompletionTracker,
    unit::WorkUnit,
    worker::{DispatchLoop, Shared},
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of units executing at once.
    pub max_concurrent: usize,

    /// Upper bound between drain re-checks when no wake-up arrives.
    pub drain_recheck_interval: Duration,

    /// Maximum time `shutdown` waits for the loop and in-flight attempts.
    pub shutdown_timeout: Duration,

    /// Throttle backoff parameters.
    pub throttle: ThrottleConfig,

    /// HTTP transport configuration, used by [`Dispatcher::start`].
    pub client: ClientConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
            drain_recheck_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(30),
            throttle: ThrottleConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Units accepted by `enqueue`.
    pub enqueued: u64,
    /// Attempts launched, retries included.
    pub dispatched: u64,
    /// Units whose result handler completed.
    pub delivered: u64,
    /// Units dropped after a permanent rejection.
    pub skipped: u64,
    /// Re-enqueues after a failed attempt.
    pub retried: u64,
    /// Units that ended in the failed set.
    pub failed: u64,
    /// Attempts launched and not yet finished.
    pub in_flight: usize,
    /// Units waiting in the queue.
    pub queued: usize,
}

/// Builder for a [`Dispatcher`] with injected collaborators.
#[derive(Debug)]
pub struct DispatcherBuilder {
    config: DispatchConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
}

impl DispatcherBuilder {
    /// Replaces the HTTP transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the clock used for throttle backoff.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event subscriber.
    #[must_use]
    pub fn event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Starts the dispatch loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ConfigurationError` if the capacity is zero,
    /// the HTTP client cannot be built, or no tokio runtime is running.
    pub fn start(self) -> Result<Dispatcher> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            DispatchError::configuration("dispatcher must be started inside a tokio runtime")
        })?;

        let limiter = ConcurrencyLimiter::new(self.config.max_concurrent)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.client.clone())?),
        };

        let shared = Arc::new(Shared {
            queue: WorkQueue::new(),
            limiter,
            throttle: ThrottleController::new(self.config.throttle.clone()),
            tracker: Arc::new(CompletionTracker::new()),
            failed: FailedWork::new(),
            executing: AtomicUsize::new(0),
            stats: Mutex::new(DispatchStats::default()),
            transport,
            clock: self.clock,
            event_handler: self.event_handler,
        });

        let cancellation_token = CancellationToken::new();
        let dispatch_loop = DispatchLoop::new(shared.clone(), cancellation_token.clone());
        let loop_handle = runtime.spawn(dispatch_loop.run());

        info!(max_concurrent = self.config.max_concurrent, "dispatcher started");

        Ok(Dispatcher {
            shared,
            config: self.config,
            cancellation_token,
            loop_handle: Some(loop_handle),
        })
    }
}

/// Bounded, throttled, retrying fetch dispatcher.
///
/// Cloneable handles are not provided; share it behind an `Arc` when several
/// producers enqueue concurrently. Every method takes `&self`.
#[derive(Debug)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    config: DispatchConfig,
    cancellation_token: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts a dispatcher with the real HTTP transport and clock.
    ///
    /// # Errors
    ///
    /// See [`DispatcherBuilder::start`].
    pub fn start(config: DispatchConfig) -> Result<Self> {
        Self::builder(config).start()
    }

    /// Returns a builder for injecting a transport, clock or event handler.
    pub fn builder(config: DispatchConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            transport: None,
            clock: Arc::new(RealClock::new()),
            event_handler: Arc::new(NoOpEventHandler::new()),
        }
    }

    /// Adds a unit at the tail of the queue. Never blocks.
    ///
    /// The unit is counted as outstanding before it becomes visible to the
    /// dispatch loop, so a concurrent `wait_for_drain` cannot miss it.
    pub fn enqueue(&self, unit: impl Into<Arc<WorkUnit>>) -> UnitId {
        let unit = unit.into();
        let unit_id = unit.id();

        self.shared.tracker.increment();
        self.shared.stats.lock().enqueued += 1;
        debug!(unit_id = %unit_id, kind = %unit.kind(), url = %unit.url(), "unit enqueued");
        self.shared.queue.push(unit);

        unit_id
    }

    /// Waits until no unit is queued or executing.
    ///
    /// Returns immediately when nothing was ever enqueued. There is no
    /// deadline: a unit keeps the dispatcher busy until it succeeds, is
    /// skipped, or exhausts its retries.
    pub async fn wait_for_drain(&self) {
        self.shared
            .tracker
            .wait_for_drain(&self.shared.queue, self.config.drain_recheck_interval)
            .await;
        debug!("dispatcher drained");
    }

    /// Every unit that exhausted its retries since the dispatcher started.
    ///
    /// Does not remove anything; later calls return a superset.
    pub fn collect_failed(&self) -> Vec<Arc<WorkUnit>> {
        self.shared.failed.snapshot()
    }

    /// Current counters.
    pub fn stats(&self) -> DispatchStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.in_flight = self.shared.executing.load(Ordering::Acquire);
        stats.queued = self.shared.queue.len();
        stats
    }

    /// Current throttle state.
    pub fn throttle_state(&self) -> ThrottleState {
        self.shared.throttle.state()
    }

    /// Units queued or executing.
    pub fn outstanding(&self) -> usize {
        self.shared.tracker.outstanding()
    }

    /// Configuration the dispatcher was started with.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Stops the dispatch loop and waits for in-flight attempts to finish.
    ///
    /// Units still queued are not dispatched. Attempts that fail during
    /// shutdown are re-enqueued as usual but never picked up again.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownTimeout` if the loop and in-flight
    /// attempts do not finish within `shutdown_timeout`.
    pub async fn shutdown(mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        info!(
            timeout_seconds = timeout.as_secs(),
            queued = self.shared.queue.len(),
            in_flight = self.shared.executing.load(Ordering::Acquire),
            "shutting down dispatcher"
        );

        self.cancellation_token.cancel();
        self.shared.limiter.close();

        let shared = self.shared.clone();
        let loop_handle = self.loop_handle.take();
        let recheck_interval = self.config.drain_recheck_interval;

        let graceful = async move {
            if let Some(handle) = loop_handle {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "dispatch loop panicked");
                }
            }
            shared
                .tracker
                .wait_until(|| shared.executing.load(Ordering::Acquire) == 0, recheck_interval)
                .await;
        };

        match tokio::time::timeout(timeout, graceful).await {
            Ok(()) => {
                info!("dispatcher shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    in_flight = self.shared.executing.load(Ordering::Acquire),
                    "dispatcher shutdown timed out, attempts may still be running"
                );
                Err(DispatchError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() {
            debug!("dispatcher dropped without shutdown, cancelling dispatch loop");
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.drain_recheck_interval, Duration::from_secs(2));
        assert_eq!(config.throttle.base_delay, Duration::from_millis(200));
        assert_eq!(config.throttle.max_delay, Duration::from_secs(5));
        assert_eq!(config.client.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let result = Dispatcher::start(DispatchConfig::default());
        assert!(matches!(result, Err(DispatchError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let config = DispatchConfig { max_concurrent: 0, ..Default::default() };
        assert!(matches!(
            Dispatcher::start(config),
            Err(DispatchError::ConfigurationError { .. })
        ));
    }

    #[tokio::test]
    async fn idle_dispatcher_drains_and_shuts_down() {
        let dispatcher = Dispatcher::start(DispatchConfig::default()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), dispatcher.wait_for_drain())
            .await
            .expect("nothing enqueued, drain must return at once");

        assert_eq!(dispatcher.stats(), DispatchStats::default());
        assert!(dispatcher.collect_failed().is_empty());
        dispatcher.shutdown().await.unwrap();
    }
}
