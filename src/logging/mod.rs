//! ## Sets up logging by reading configuration from environment variables.
//!
//! Environment variables used:
//! - LOG_MODE: "stdout" (default) or "file"
//! - LOG_LEVEL: log level ("trace", "debug", "info", "warn", "error"); default is "info"
//! - LOG_DATA_DIR: directory of the log files in file mode (default "./logs")
//! - LOG_MAX_SIZE: size in bytes after which a new file is started (default 1GB)
//!
//! In file mode logs go to `<LOG_DATA_DIR>/pubsub-jobs-<YYYY-MM-DD>.<N>.log`.
use chrono::Utc;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::info;
use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};
use std::{
    env,
    fs::{create_dir_all, metadata, OpenOptions},
    path::{Path, PathBuf},
};

const LOG_FILE_NAME: &str = "pubsub-jobs.log";
const DEFAULT_LOG_MAX_SIZE: u64 = 1_073_741_824;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    Stdout,
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub mode: LogMode,
    pub level: LevelFilter,
    pub data_dir: PathBuf,
    pub max_size: u64,
}

impl LoggingConfig {
    /// Reads the logging environment. An unparsable `LOG_MAX_SIZE` is an error.
    pub fn from_env() -> Result<Self> {
        let mode = match env::var("LOG_MODE")
            .unwrap_or_else(|_| "stdout".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => LogMode::File,
            _ => LogMode::Stdout,
        };

        let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

        let data_dir = PathBuf::from(env::var("LOG_DATA_DIR").unwrap_or_else(|_| "./logs".to_string()));

        let max_size = match env::var("LOG_MAX_SIZE") {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|_| eyre!("LOG_MAX_SIZE must be a valid u64 if set, got {}", value))?,
            Err(_) => DEFAULT_LOG_MAX_SIZE,
        };

        Ok(Self {
            mode,
            level,
            data_dir,
            max_size,
        })
    }

    /// Log file to write to today, after size-based rolling.
    pub fn log_file_path(&self, date_str: &str) -> String {
        let base_file_path = self.data_dir.join(LOG_FILE_NAME).to_string_lossy().to_string();
        let time_based_path = time_based_rolling(&base_file_path, date_str, 1);
        space_based_rolling(&time_based_path, &base_file_path, date_str, self.max_size)
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Computes the path of the rolled log file given the base file path and the date string.
pub fn compute_rolled_file_path(base_file_path: &str, date_str: &str, index: u32) -> String {
    let stem = base_file_path
        .strip_suffix(".log")
        .unwrap_or(base_file_path);
    format!("{}-{}.{}.log", stem, date_str, index)
}

/// Generates a time-based log file name.
pub fn time_based_rolling(base_file_path: &str, date_str: &str, index: u32) -> String {
    compute_rolled_file_path(base_file_path, date_str, index)
}

/// Starting from `file_path`, moves to the next index while the candidate
/// file is larger than `max_size` bytes.
pub fn space_based_rolling(
    file_path: &str,
    base_file_path: &str,
    date_str: &str,
    max_size: u64,
) -> String {
    let mut final_path = file_path.to_string();
    let mut index = 1;
    while let Ok(metadata) = metadata(&final_path) {
        if metadata.len() <= max_size {
            break;
        }
        final_path = compute_rolled_file_path(base_file_path, date_str, index);
        index += 1;
    }
    final_path
}

/// Installs the global logger described by the environment.
pub fn setup_logging() -> Result<()> {
    let config = LoggingConfig::from_env()?;

    match config.mode {
        LogMode::File => {
            let date_str = Utc::now().format("%Y-%m-%d").to_string();
            let final_path = config.log_file_path(&date_str);

            if let Some(parent) = Path::new(&final_path).parent() {
                create_dir_all(parent)
                    .wrap_err_with(|| format!("Failed to create log directory {:?}", parent))?;
            }

            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&final_path)
                .wrap_err_with(|| format!("Unable to open log file {}", final_path))?;

            WriteLogger::init(config.level, Config::default(), log_file)
                .wrap_err("Failed to initialize file logger")?;
            info!("Logging to file: {}", final_path);
        }
        LogMode::Stdout => {
            SimpleLogger::init(config.level, Config::default())
                .wrap_err("Failed to initialize simple logger")?;
        }
    }

    info!(
        "Logging is successfully configured (mode: {:?}, level: {})",
        config.mode, config.level
    );
    Ok(())
}
