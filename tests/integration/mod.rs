mod job_queue;
mod logging;
