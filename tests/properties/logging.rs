//! Property-based tests for log file naming.
//!
//! `compute_rolled_file_path` appends the date and index to the base name and
//! keeps the `.log` extension exactly once.
//!
//!   Refer to `src/logging/mod.rs` for more details.
use proptest::{prelude::*, test_runner::Config};
use pubsub_jobs::logging::compute_rolled_file_path;

proptest! {
    #![proptest_config(Config {
        cases: 500, ..Config::default()
    })]

    #[test]
    fn prop_rolled_path_replaces_log_suffix(
        base in "[a-zA-Z0-9_/-]{1,40}",
        date in "[0-9]{4}-[0-9]{2}-[0-9]{2}",
        index in 1u32..1000,
    ) {
        let result = compute_rolled_file_path(&format!("{}.log", base), &date, index);
        prop_assert_eq!(result, format!("{}-{}.{}.log", base, date, index));
    }

    #[test]
    fn prop_rolled_path_without_log_suffix(
        base in ".*",
        date in "[0-9]{4}-[0-9]{2}-[0-9]{2}",
    ) {
        let base_non_log = if base.ends_with(".log") {
            format!("{}x", base)
        } else {
            base
        };
        let result = compute_rolled_file_path(&base_non_log, &date, 1);
        prop_assert_eq!(result, format!("{}-{}.1.log", base_non_log, date));
    }

    #[test]
    fn prop_rolled_path_always_ends_with_single_log(
        base in "[a-z]{1,10}(\\.log)?",
        index in 1u32..100,
    ) {
        let result = compute_rolled_file_path(&base, "2024-01-01", index);
        prop_assert!(result.ends_with(".log"));
        prop_assert!(!result.ends_with(".log.log"));
    }
}
