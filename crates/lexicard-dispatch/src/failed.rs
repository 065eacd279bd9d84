//! Units that exhausted their retry budget.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::unit::WorkUnit;

/// Append-only set of terminally failed units.
///
/// Units are never removed, so every snapshot is a superset of the previous
/// one.
#[derive(Debug, Default)]
pub struct FailedWork {
    units: Mutex<Vec<Arc<WorkUnit>>>,
}

impl FailedWork {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed unit.
    pub fn push(&self, unit: Arc<WorkUnit>) {
        self.units.lock().push(unit);
    }

    /// Every unit failed so far, in failure order.
    pub fn snapshot(&self) -> Vec<Arc<WorkUnit>> {
        self.units.lock().clone()
    }

    /// Number of failed units.
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    /// Whether nothing has failed.
    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_grow_monotonically() {
        let failed = FailedWork::new();
        assert!(failed.is_empty());

        let first = Arc::new(WorkUnit::page("https://dict.example/a_1", |_| {}).unwrap());
        failed.push(first.clone());
        let before = failed.snapshot();

        failed.push(Arc::new(WorkUnit::page("https://dict.example/b_1", |_| {}).unwrap()));
        let after = failed.snapshot();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id(), first.id());
        assert_eq!(failed.len(), 2);
    }
}
