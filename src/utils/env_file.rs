//! Helpers for values persisted to the local `.env` file.
//!
//! Topic and subscription suffixes keep separate environments apart when
//! they share a Pub/Sub project. When a suffix is not configured a random
//! one is generated once and written back to the env file so later runs
//! reuse the same broker resources.
use std::{env, fs::OpenOptions, io::Write, path::Path};

use log::info;
use rand::{distr::Alphanumeric, Rng};

use crate::{
    config::ConfigError,
    constants::{GENERATED_SUFFIX_HEAD_LEN, GENERATED_SUFFIX_TAIL_LEN},
};

fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a suffix shaped like `aB3dE5fG7h-X9yZ`.
pub fn generate_suffix() -> String {
    format!(
        "{}-{}",
        random_alphanumeric(GENERATED_SUFFIX_HEAD_LEN),
        random_alphanumeric(GENERATED_SUFFIX_TAIL_LEN)
    )
}

/// Returns the value of `key`, generating and persisting one when unset.
///
/// A generated value is appended to `env_file` as `KEY=value` and exported
/// into the current process environment.
pub fn ensure_env_value(key: &str, env_file: &Path) -> Result<String, ConfigError> {
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            return Ok(value);
        }
    }

    let value = generate_suffix();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)
        .map_err(|e| ConfigError::EnvFile(format!("{}: {}", env_file.display(), e)))?;
    writeln!(file, "\n{}={}", key, value)
        .map_err(|e| ConfigError::EnvFile(format!("{}: {}", env_file.display(), e)))?;

    env::set_var(key, &value);
    info!(
        "Generated {} and saved it to {}",
        key,
        env_file.display()
    );

    Ok(value)
}
