//! Integration tests for file logging.
//!
//! Environment variables used:
//! - LOG_MODE: "stdout" (default) or "file"
//! - LOG_LEVEL: log level ("trace", "debug", "info", "warn", "error"); default is "info"
//! - LOG_DATA_DIR: directory of the log files in file mode (default "./logs")
//!   Refer to `src/logging/mod.rs` for more details.
use chrono::Utc;
use pubsub_jobs::logging::{setup_logging, space_based_rolling, time_based_rolling};
use std::{env, fs, io::Write, path::Path, sync::Mutex, thread, time::Duration};
use tempfile::TempDir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn compute_final_log_path(base_file_path: &str, date_str: &str, max_size: u64) -> String {
    let time_based_path = time_based_rolling(base_file_path, date_str, 1);
    space_based_rolling(&time_based_path, base_file_path, date_str, max_size)
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[test]
fn test_invalid_log_max_size_is_an_error() {
    let _guard = ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let temp_dir = TempDir::new().unwrap();

    env::set_var("LOG_MODE", "file");
    env::set_var("LOG_LEVEL", "debug");
    env::set_var("LOG_DATA_DIR", temp_dir.path());
    env::set_var("LOG_MAX_SIZE", "invalid_value");

    let result = setup_logging();
    env::remove_var("LOG_MAX_SIZE");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("LOG_MAX_SIZE must be a valid u64"));
}

// The global logger can only be installed once per process, so this is the
// only test that installs it.
#[test]
fn test_setup_logging_file_mode_creates_log_file() {
    let _guard = ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let temp_dir = TempDir::new().unwrap();

    env::remove_var("LOG_MAX_SIZE");
    env::set_var("LOG_MODE", "file");
    env::set_var("LOG_LEVEL", "debug");
    env::set_var("LOG_DATA_DIR", temp_dir.path());

    setup_logging().unwrap();
    log::info!("integration test line");
    thread::sleep(Duration::from_millis(200));

    let base = temp_dir.path().join("pubsub-jobs.log");
    let expected_path = time_based_rolling(base.to_str().unwrap(), &today(), 1);

    assert!(
        Path::new(&expected_path).exists(),
        "Expected log file {} does not exist",
        expected_path
    );
    let contents = fs::read_to_string(&expected_path).unwrap();
    assert!(contents.contains("integration test line"));

    env::remove_var("LOG_MODE");
    env::remove_var("LOG_LEVEL");
    env::remove_var("LOG_DATA_DIR");
}

#[test]
fn test_log_file_rolls_when_existing_is_full() {
    let temp_dir = TempDir::new().unwrap();
    let base_file = temp_dir.path().join("pubsub-jobs.log");
    let date_str = today();

    let first = time_based_rolling(base_file.to_str().unwrap(), &date_str, 1);
    fs::write(&first, "Existing log file").unwrap();

    let rolled_path = compute_final_log_path(base_file.to_str().unwrap(), &date_str, 10);

    assert_ne!(rolled_path, first);
    assert!(rolled_path.contains("pubsub-jobs-"));
}

#[test]
fn test_space_based_rolling_returns_original_when_under_max_size() {
    let temp_dir = TempDir::new().unwrap();
    let base_file_path = format!("{}/pubsub-jobs.log", temp_dir.path().to_str().unwrap());
    let date_str = today();
    let time_based_path = time_based_rolling(&base_file_path, &date_str, 1);

    let mut file = fs::File::create(&time_based_path).unwrap();
    write!(file, "small file").unwrap();

    let rolled_file_path =
        space_based_rolling(&time_based_path, &base_file_path, &date_str, 10_000);
    assert_eq!(rolled_file_path, time_based_path);
}
