//! Scripted in-memory transport.
//!
//! Each URL gets a queue of outcomes consumed one per attempt; once a queue
//! runs dry the fallback outcome answers. The transport counts attempts per
//! URL and records the peak number of concurrent executions, which is what
//! concurrency-cap tests assert on.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use lexicard_dispatch::{DispatchError, FetchRequest, FetchResponse, Result, Transport};
use parking_lot::Mutex;

/// What one attempt against a URL produces.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Remote answers with this status and an empty body.
    Status(u16),
    /// Remote answers with this status and body.
    Body(u16, Bytes),
    /// Remote answers with this status and a Retry-After header.
    RetryAfter(u16, u64),
    /// Connection-level failure.
    ConnectionRefused,
}

impl Outcome {
    /// 200 with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Body(200, body.into())
    }

    fn into_result(self) -> Result<FetchResponse> {
        match self {
            Self::Status(status) => Ok(FetchResponse::new(status, Bytes::new())),
            Self::Body(status, body) => Ok(FetchResponse::new(status, body)),
            Self::RetryAfter(status, seconds) => {
                let mut response = FetchResponse::new(status, Bytes::new());
                response.headers.insert("retry-after".to_string(), seconds.to_string());
                Ok(response)
            },
            Self::ConnectionRefused => Err(DispatchError::network("connection refused")),
        }
    }
}

/// Transport answering from per-URL scripts.
#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    attempts: Mutex<HashMap<String, u32>>,
    fallback: Outcome,
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total_attempts: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    /// Transport answering 200 with an empty body to every URL.
    pub fn new() -> Self {
        Self::with_fallback(Outcome::Status(200))
    }

    /// Transport answering `fallback` once a URL's script is exhausted.
    pub fn with_fallback(fallback: Outcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            fallback,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            total_attempts: AtomicUsize::new(0),
        }
    }

    /// Holds every execution open for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues outcomes for `url`, consumed one per attempt.
    #[must_use]
    pub fn script(self, url: &str, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.scripts.lock().entry(url.to_string()).or_default().extend(outcomes);
        self
    }

    /// Attempts made against `url`.
    pub fn attempts_for(&self, url: &str) -> u32 {
        self.attempts.lock().get(url).copied().unwrap_or(0)
    }

    /// Attempts made against every URL.
    pub fn total_attempts(&self) -> usize {
        self.total_attempts.load(Ordering::SeqCst)
    }

    /// Highest number of executions observed at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Executions running right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        self.total_attempts.fetch_add(1, Ordering::SeqCst);

        let url = request.url.as_str().to_string();
        *self.attempts.lock().entry(url.clone()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.scripts.lock().get_mut(&url).and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.fallback.clone()).into_result()
    }
}
