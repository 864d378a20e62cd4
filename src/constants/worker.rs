//! Default values for the worker pull loop and message settlement.
use std::time::Duration;

/// Messages requested per pull when no bulk size is configured.
pub const DEFAULT_BULK_SIZE: usize = 1;
/// Upper bound accepted by the pull API for a single request.
pub const MAX_BULK_SIZE: usize = 1_000;

/// Concurrently admitted pull batches when no flow control is configured.
pub const DEFAULT_FLOW_CONTROL_MAX_MESSAGES: usize = 1;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ack deadline assigned to subscriptions created by the worker.
pub const DEFAULT_ACK_DEADLINE_SECONDS: u32 = 60;
pub const MIN_ACK_DEADLINE_SECONDS: u32 = 10;
pub const MAX_ACK_DEADLINE_SECONDS: u32 = 600;

/// Deadline passed to `modifyAckDeadline` when a job is nacked.
/// The message becomes eligible for redelivery once it elapses.
pub const DEFAULT_NACK_DEADLINE_SECONDS: u32 = 10;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Key under which the broker message id is exposed in job data.
pub const JOB_ID_FIELD: &str = "jobId";
