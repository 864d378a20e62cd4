/// This module provides the queue facade that ties producers and workers together.
mod queue;
pub use queue::*;

/// This module is responsible for publishing jobs.
mod job_producer;
pub use job_producer::*;

/// This module defines the job, its wire envelope and the received job.
mod job;
pub use job::*;

/// This module implements the bounded retry loop used by every broker call.
mod retry_backoff;
pub use retry_backoff::*;

/// This module settles delivered messages and tracks the in-flight window.
mod acknowledger;
pub use acknowledger::*;

/// This module runs the subscription poll loops.
mod worker;
pub use worker::*;
