//! Options accepted by `Worker::process`.
//!
//! The in-flight window is counted in pull batches. With the default bulk
//! size of one a batch is a single message, so `max_messages` bounds the
//! number of jobs processed at once.
use std::time::Duration;

use crate::{
    config::ConfigError,
    constants::{
        DEFAULT_ACK_DEADLINE_SECONDS, DEFAULT_BULK_SIZE, DEFAULT_FLOW_CONTROL_MAX_MESSAGES,
        DEFAULT_NACK_DEADLINE_SECONDS, DEFAULT_POLL_INTERVAL, MAX_ACK_DEADLINE_SECONDS,
        MAX_BULK_SIZE, MIN_ACK_DEADLINE_SECONDS,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Maximum number of pull batches admitted at the same time.
    pub max_messages: usize,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_FLOW_CONTROL_MAX_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub flow_control: FlowControl,
    /// Messages requested per pull.
    pub bulk_size: usize,
    /// Time between two poll cycles.
    pub poll_interval: Duration,
    /// Ack deadline of subscriptions created for this job.
    pub ack_deadline_seconds: u32,
    /// Deadline set on nacked messages before the broker redelivers them.
    pub nack_deadline_seconds: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            flow_control: FlowControl::default(),
            bulk_size: DEFAULT_BULK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ack_deadline_seconds: DEFAULT_ACK_DEADLINE_SECONDS,
            nack_deadline_seconds: DEFAULT_NACK_DEADLINE_SECONDS,
        }
    }
}

impl WorkerOptions {
    pub fn new(max_messages: usize) -> Self {
        Self::default().with_max_messages(max_messages)
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.flow_control.max_messages = max_messages;
        self
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_ack_deadline_seconds(mut self, seconds: u32) -> Self {
        self.ack_deadline_seconds = seconds;
        self
    }

    pub fn with_nack_deadline_seconds(mut self, seconds: u32) -> Self {
        self.nack_deadline_seconds = seconds;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flow_control.max_messages == 0 {
            return Err(ConfigError::invalid(
                "flow_control.max_messages",
                "must be at least 1",
            ));
        }
        if self.bulk_size == 0 || self.bulk_size > MAX_BULK_SIZE {
            return Err(ConfigError::invalid(
                "bulk_size",
                format!("must be between 1 and {}", MAX_BULK_SIZE),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be non-zero"));
        }
        if !(MIN_ACK_DEADLINE_SECONDS..=MAX_ACK_DEADLINE_SECONDS)
            .contains(&self.ack_deadline_seconds)
        {
            return Err(ConfigError::invalid(
                "ack_deadline_seconds",
                format!(
                    "must be between {} and {}",
                    MIN_ACK_DEADLINE_SECONDS, MAX_ACK_DEADLINE_SECONDS
                ),
            ));
        }
        if self.nack_deadline_seconds > MAX_ACK_DEADLINE_SECONDS {
            return Err(ConfigError::invalid(
                "nack_deadline_seconds",
                format!("must be at most {}", MAX_ACK_DEADLINE_SECONDS),
            ));
        }
        Ok(())
    }
}
