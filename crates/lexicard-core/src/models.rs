//! Strongly-typed identifiers and outcome classes.
//!
//! A work unit keeps the same [`UnitId`] across every retry round-trip, which
//! is what lets logs, events and the failure report refer to one logical
//! unit regardless of how many times it was dispatched.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed work unit identifier.
///
/// # Example
///
/// ```
/// use lexicard_core::models::UnitId;
/// let unit_id = UnitId::new();
/// println!("dispatching unit: {}", unit_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub Uuid);

impl UnitId {
    /// Creates a new random unit ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UnitId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// How a single observed response is treated by the dispatcher.
///
/// Each work unit carries a classifier that maps a raw status code onto one
/// of these classes. Transport-level failures never reach the classifier;
/// they are handled like [`Classification::RetryableOther`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Payload is delivered to the unit's result handler. Clears throttling.
    Success,
    /// Remote permanently rejected the unit (e.g. not found). Terminal, not a
    /// failure. Clears throttling.
    PermanentSkip,
    /// Rate limiting or server distress. Retried, and engages the global
    /// throttle.
    RetryableCritical,
    /// Any other unexpected status. Retried without touching the throttle.
    RetryableOther,
}

impl Classification {
    /// Whether the outcome counts as evidence of remote distress.
    pub fn is_distress(self) -> bool {
        self == Self::RetryableCritical
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PermanentSkip => write!(f, "permanent_skip"),
            Self::RetryableCritical => write!(f, "retryable_critical"),
            Self::RetryableOther => write!(f, "retryable_other"),
        }
    }
}

/// Which kind of work a unit performs, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKindLabel {
    /// Fetch an HTML page and hand its body to a handler.
    PageFetch,
    /// Download a file to a path on disk.
    FileDownload,
}

impl fmt::Display for UnitKindLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageFetch => write!(f, "page_fetch"),
            Self::FileDownload => write!(f, "file_download"),
        }
    }
}
