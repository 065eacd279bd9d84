//! Core domain types shared by the fetch dispatcher and its callers.
//!
//! Provides strongly-typed work unit identifiers, the outcome classes a
//! response can fall into, the event vocabulary emitted while units move
//! through the dispatcher, and a clock abstraction so backoff and drain
//! timing can be driven deterministically in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod models;
pub mod time;

pub use events::{
    DispatchEvent, EventHandler, MulticastEventHandler, NoOpEventHandler, UnitEvent,
};
pub use models::{Classification, UnitId, UnitKindLabel};
pub use time::{Clock, RealClock, TestClock};
