//! Configuration for the job queue.
//!
//! This module handles:
//! - Environment variable integration (`QueueConfig::from_env`)
//! - Generated topic and subscription suffixes
//! - Validation of credentials and worker options
mod queue_config;
pub use queue_config::*;

mod worker_options;
pub use worker_options::*;

mod error;
pub use error::*;
