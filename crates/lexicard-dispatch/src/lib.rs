//! Bounded, throttled, retrying HTTP fetch dispatcher.
//!
//! Callers wrap each remote fetch in a [`WorkUnit`] and hand it to a
//! [`Dispatcher`]. The dispatcher runs at most `max_concurrent` units at a
//! time, retries failures at the tail of the queue until each unit's budget
//! runs out, slows down globally while the remote side signals distress, and
//! lets callers block until every queued and running unit has finished.
//!
//! # Key Features
//!
//! - **Concurrency cap** - a semaphore slot is held for the whole execution
//!   of a unit
//! - **Retry at the tail** - a failed unit keeps its identity and budget
//! - **Global throttle** - 429 and 5xx responses engage exponential backoff,
//!   cleared by the next success or 404
//! - **Drain detection** - `wait_for_drain` wakes on every completion and
//!   never misses a re-enqueued unit
//!
//! # Example
//!
//! ```no_run
//! use lexicard_dispatch::{unit::dictionary_page_url, DispatchConfig, Dispatcher, WorkUnit};
//!
//! # async fn example() -> lexicard_dispatch::Result<()> {
//! let dispatcher = Dispatcher::start(DispatchConfig::default())?;
//!
//! let url = dictionary_page_url(lexicard_dispatch::DEFAULT_DICTIONARY_BASE_URL, "run");
//! dispatcher.enqueue(WorkUnit::page(&url, |html| println!("{} bytes", html.len()))?);
//!
//! dispatcher.wait_for_drain().await;
//! for unit in dispatcher.collect_failed() {
//!     eprintln!("failed: {}", unit.url());
//! }
//! dispatcher.shutdown().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod failed;
pub mod limiter;
pub mod queue;
pub mod report;
pub mod throttle;
pub mod tracker;
pub mod unit;
mod worker;

pub use client::{ClientConfig, FetchRequest, FetchResponse, HttpTransport, Transport};
pub use engine::{DispatchConfig, DispatchStats, Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, ErrorCategory, Result};
pub use report::FailureReporter;
pub use throttle::{ThrottleConfig, ThrottleState};
pub use unit::{classify_status, WorkUnit};

/// Default number of units executing at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default retry budget of a new unit.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Dictionary the page units fetch from.
pub const DEFAULT_DICTIONARY_BASE_URL: &str =
    "https://www.oxfordlearnersdictionaries.com/definition/english/";
