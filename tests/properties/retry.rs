//! Property-based tests for the retry loop and backoff delays.
//!
//!   Refer to `src/jobs/retry_backoff.rs` for more details.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use proptest::{prelude::*, test_runner::Config};
use pubsub_jobs::{
    constants::RETRY_JITTER_PERCENT,
    jobs::{calculate_retry_delay, with_retry, RetryPolicy},
};

fn run_always_failing(max_retries: usize) -> (usize, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result: Result<(), _> = runtime.block_on(with_retry(
        "always_fails",
        &RetryPolicy::immediate(max_retries),
        || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            }
        },
    ));

    let attempts = result.unwrap_err().attempts();
    (attempts, calls.load(Ordering::SeqCst))
}

proptest! {
    #![proptest_config(Config {
        cases: 64, ..Config::default()
    })]

    #[test]
    fn prop_always_failing_operation_makes_max_retries_plus_one_attempts(
        max_retries in 0usize..50,
    ) {
        let (attempts, calls) = run_always_failing(max_retries);
        prop_assert_eq!(attempts, max_retries + 1);
        prop_assert_eq!(calls, max_retries + 1);
    }

    #[test]
    fn prop_delay_is_capped_and_jittered(
        attempt in 0u32..100,
        base in 1u64..1_000,
        extra in 0u64..10_000,
    ) {
        let max = base + extra;
        let delay = calculate_retry_delay(attempt, base, max).as_millis() as f64;
        let upper = (max as f64 * (1.0 + RETRY_JITTER_PERCENT)).ceil();
        let lower = (base as f64 * (1.0 - RETRY_JITTER_PERCENT)).floor();
        prop_assert!(delay <= upper, "{} > {}", delay, upper);
        prop_assert!(delay >= lower, "{} < {}", delay, lower);
    }

    #[test]
    fn prop_policy_rejects_inconsistent_delays(
        retries in 0usize..10,
        base in 1u64..1_000,
    ) {
        prop_assert!(RetryPolicy::new(retries, base, 0).is_err());
        prop_assert!(RetryPolicy::new(retries, 0, base).is_err());
        prop_assert!(RetryPolicy::new(retries, base, base).is_ok());
        prop_assert!(RetryPolicy::new(retries, base + 1, base).is_err());
    }
}
