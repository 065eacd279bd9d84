//! Global throttle engaged by remote distress.
//!
//! ```text
//!                 429 / 5xx observed
//!   ┌──────────┐ ───────────────────▶ ┌─────────────┐
//!   │  NORMAL  │                      │  THROTTLED  │ ──┐ further 429 / 5xx:
//!   └──────────┘ ◀─────────────────── └─────────────┘ ◀─┘ counter + 1
//!                 success or 404
//! ```
//!
//! While throttled, the dispatch loop sleeps before every slot acquisition
//! for `min(max_delay, base_delay * 2^consecutive_critical_failures)`. The
//! throttle is shared by every unit regardless of target host.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Delay for a counter value of zero.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

/// Snapshot of the throttle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleState {
    /// Distress signals seen since the last reset.
    pub consecutive_critical_failures: u32,
    /// Whether the loop must back off before dispatching.
    pub throttled: bool,
}

/// Tracks remote distress and computes dispatch backoff.
#[derive(Debug)]
pub struct ThrottleController {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl ThrottleController {
    /// Creates a controller in the normal state.
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config, state: Mutex::new(ThrottleState::default()) }
    }

    /// Records a distress signal. Returns the new counter value.
    pub fn record_distress(&self) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_critical_failures = state.consecutive_critical_failures.saturating_add(1);
        state.throttled = true;
        state.consecutive_critical_failures
    }

    /// Records a healthy outcome. Returns `true` if this cleared an active
    /// throttle.
    pub fn record_recovery(&self) -> bool {
        let mut state = self.state.lock();
        if state.consecutive_critical_failures == 0 && !state.throttled {
            return false;
        }
        *state = ThrottleState::default();
        true
    }

    /// Delay to sleep before the next dispatch, or `None` when not throttled.
    pub fn current_backoff(&self) -> Option<Duration> {
        let state = *self.state.lock();
        state.throttled.then(|| self.backoff_for(state.consecutive_critical_failures))
    }

    /// Backoff for a given counter value, capped at `max_delay`.
    pub fn backoff_for(&self, consecutive_critical_failures: u32) -> Duration {
        let factor = 1u32.checked_shl(consecutive_critical_failures).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// Current state.
    pub fn state(&self) -> ThrottleState {
        *self.state.lock()
    }

    /// Backoff parameters.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let throttle = ThrottleController::default();

        let delays: Vec<u128> = (0..8).map(|n| throttle.backoff_for(n).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200, 5000, 5000, 5000]);
    }

    #[test]
    fn huge_counters_stay_capped() {
        let throttle = ThrottleController::default();
        assert_eq!(throttle.backoff_for(31), Duration::from_secs(5));
        assert_eq!(throttle.backoff_for(32), Duration::from_secs(5));
        assert_eq!(throttle.backoff_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn normal_state_has_no_backoff() {
        let throttle = ThrottleController::default();
        assert_eq!(throttle.current_backoff(), None);
        assert!(!throttle.record_recovery());
    }

    #[test]
    fn distress_engages_and_recovery_resets() {
        let throttle = ThrottleController::default();

        assert_eq!(throttle.record_distress(), 1);
        assert_eq!(throttle.current_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(throttle.record_distress(), 2);
        assert_eq!(throttle.current_backoff(), Some(Duration::from_millis(800)));

        assert!(throttle.record_recovery());
        assert_eq!(throttle.state(), ThrottleState::default());
        assert_eq!(throttle.current_backoff(), None);
        assert!(!throttle.record_recovery());
    }

    #[test]
    fn counter_saturates() {
        let throttle = ThrottleController::default();
        *throttle.state.lock() =
            ThrottleState { consecutive_critical_failures: u32::MAX, throttled: true };

        assert_eq!(throttle.record_distress(), u32::MAX);
        assert_eq!(throttle.current_backoff(), Some(Duration::from_secs(5)));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(n in 0u32..64) {
            let throttle = ThrottleController::default();
            let current = throttle.backoff_for(n);
            let next = throttle.backoff_for(n + 1);

            prop_assert!(current <= next);
            prop_assert!(current >= Duration::from_millis(200));
            prop_assert!(next <= Duration::from_secs(5));
        }
    }
}
