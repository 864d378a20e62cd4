//! Job queue on top of Google Cloud Pub/Sub.
//!
//! Producers publish named jobs with JSON payloads; workers pull them with a
//! bounded in-flight window and settle each one with an explicit ack or nack.
//! Every broker call is guarded by a bounded retry loop.
//!
//! # Module Structure
//!
//! - `config`: queue configuration and worker options
//! - `constants`: defaults and wire field names
//! - `jobs`: producer, worker, acknowledger, retry and the queue facade
//! - `logging`: logger setup
//! - `models`: credentials and secrets
//! - `services`: broker clients (Pub/Sub REST and in-memory)
//! - `utils`: base64 and `.env` helpers

pub mod config;
pub mod constants;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;
