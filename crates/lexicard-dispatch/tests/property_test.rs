//! Property-based tests for dispatcher bookkeeping.
//!
//! Random outcome scripts are played against random retry budgets and
//! capacities. Whatever the mix, every unit must end in exactly one terminal
//! state, be attempted exactly as often as its script and budget dictate, and
//! the dispatcher must drain with nothing left in flight.

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use lexicard_core::TestClock;
use lexicard_dispatch::{Dispatcher, WorkUnit};
use lexicard_testing::{page_url, test_config, Outcome, ScriptedTransport};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Delivered,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
struct UnitPlan {
    script: Vec<u16>,
    retries: u32,
}

impl UnitPlan {
    /// Walks the script the way the dispatcher should; 0 stands for a
    /// refused connection and an exhausted script answers 200.
    fn expected(&self) -> (Fate, u32) {
        let mut attempt = 0;
        loop {
            let status = self.script.get(attempt as usize).copied().unwrap_or(200);
            attempt += 1;
            match status {
                200 => return (Fate::Delivered, attempt),
                404 => return (Fate::Skipped, attempt),
                _ if attempt > self.retries => return (Fate::Failed, attempt),
                _ => {},
            }
        }
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.script
            .iter()
            .map(|&status| match status {
                0 => Outcome::ConnectionRefused,
                200 => Outcome::ok("<html/>"),
                other => Outcome::Status(other),
            })
            .collect()
    }
}

fn plan_strategy() -> impl Strategy<Value = UnitPlan> {
    (
        prop::collection::vec(prop::sample::select(vec![0u16, 200, 403, 404, 429, 500, 503]), 0..6),
        0u32..4,
    )
        .prop_map(|(script, retries)| UnitPlan { script, retries })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_unit_reaches_exactly_one_terminal_state(
        plans in prop::collection::vec(plan_strategy(), 1..12),
        max_concurrent in 1usize..5,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        runtime.block_on(async {
            let mut transport = ScriptedTransport::new();
            for (i, plan) in plans.iter().enumerate() {
                transport = transport.script(&page_url(&format!("w{i}")), plan.outcomes());
            }
            let transport = Arc::new(transport);

            let dispatcher = Dispatcher::builder(test_config(max_concurrent))
                .transport(transport.clone())
                .clock(Arc::new(TestClock::new()))
                .start()
                .unwrap();

            let mut handler_calls = HashMap::new();
            for (i, plan) in plans.iter().enumerate() {
                let calls = Arc::new(AtomicUsize::new(0));
                let counter = calls.clone();
                let unit = WorkUnit::page(&page_url(&format!("w{i}")), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
                .with_retries(plan.retries);
                let unit_id = dispatcher.enqueue(unit);
                handler_calls.insert(i, (unit_id, calls));
            }

            tokio::time::timeout(Duration::from_secs(10), dispatcher.wait_for_drain())
                .await
                .unwrap();

            let failed: Vec<_> = dispatcher.collect_failed().iter().map(|unit| unit.id()).collect();

            for (i, plan) in plans.iter().enumerate() {
                let (expected_fate, expected_attempts) = plan.expected();
                let (unit_id, calls) = &handler_calls[&i];
                let url = page_url(&format!("w{i}"));

                assert_eq!(transport.attempts_for(&url), expected_attempts, "plan {plan:?}");
                assert_eq!(
                    calls.load(Ordering::SeqCst),
                    usize::from(expected_fate == Fate::Delivered),
                    "plan {plan:?}"
                );
                assert_eq!(failed.contains(unit_id), expected_fate == Fate::Failed, "plan {plan:?}");
            }

            let stats = dispatcher.stats();
            assert_eq!(stats.in_flight, 0);
            assert_eq!(stats.queued, 0);
            assert_eq!(dispatcher.outstanding(), 0);
            assert!(transport.peak_in_flight() <= max_concurrent);
            dispatcher.shutdown().await.unwrap();
        });
    }
}
