//! Test support for lexicard crates.
//!
//! Provides a wiremock-backed HTTP server, a scripted in-memory transport
//! with attempt and concurrency accounting, an event recorder, and fixture
//! helpers for building work units.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod http;
pub mod transport;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

pub use events::RecordingEventHandler;
pub use http::MockServer;
use lexicard_dispatch::{DispatchConfig, WorkUnit};
pub use transport::{Outcome, ScriptedTransport};
use tracing_subscriber::EnvFilter;

/// Host used for units that never leave the process.
pub const TEST_DICTIONARY_URL: &str = "https://dict.example/definition/english";

/// Installs a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,lexicard=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Dispatch configuration with a short drain re-check for tests.
pub fn test_config(max_concurrent: usize) -> DispatchConfig {
    DispatchConfig {
        max_concurrent,
        drain_recheck_interval: std::time::Duration::from_millis(100),
        shutdown_timeout: std::time::Duration::from_secs(5),
        ..Default::default()
    }
}

/// URL of the dictionary page for `word` on the in-process test host.
pub fn page_url(word: &str) -> String {
    lexicard_dispatch::unit::dictionary_page_url(TEST_DICTIONARY_URL, word)
}

/// Page unit for `word` that counts handler invocations and keeps the body.
pub fn counting_page_unit(
    word: &str,
    calls: &Arc<AtomicUsize>,
    bodies: &Arc<parking_lot::Mutex<Vec<String>>>,
) -> WorkUnit {
    let calls = calls.clone();
    let bodies = bodies.clone();
    WorkUnit::page(&page_url(word), move |body| {
        calls.fetch_add(1, Ordering::SeqCst);
        bodies.lock().push(body);
    })
    .unwrap_or_else(|e| panic!("test page url for '{word}' is invalid: {e}"))
}

/// Download unit for `file_name` on `base_url`, saved under `dir`.
pub fn download_unit(base_url: &str, file_name: &str, dir: &Path) -> WorkUnit {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), file_name);
    WorkUnit::download(&url, dir)
        .unwrap_or_else(|e| panic!("test download url '{url}' is invalid: {e}"))
}
