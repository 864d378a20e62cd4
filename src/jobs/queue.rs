//! Queue facade.
//!
//! A [`JobQueue`] owns one broker client and one producer, and hands out
//! jobs and workers that share them:
//!
//! ```rust,ignore
//! let queue = JobQueue::setup()?;
//! queue.create_job("send-email", payload).save().await?;
//!
//! let worker = queue.worker()?;
//! worker.process("send-email", handler, WorkerOptions::new(5)).await?;
//! ```
use std::sync::Arc;

use color_eyre::{eyre, Result};
use log::info;

use super::{Job, JobPayload, JobProducer, JobProducerError, QueuedJob, Worker, WorkerError};
use crate::{
    config::QueueConfig,
    services::{GooglePubSubClient, PubSubClientTrait},
};

#[derive(Clone)]
pub struct JobQueue {
    config: QueueConfig,
    client: Arc<dyn PubSubClientTrait>,
    producer: Arc<JobProducer>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("project_id", &self.config.project_id)
            .field("producer", &self.producer)
            .finish()
    }
}

impl JobQueue {
    /// Connects to Google Cloud Pub/Sub, or to the emulator when one is configured.
    pub fn new(config: QueueConfig) -> Result<Self, JobProducerError> {
        config.validate()?;
        let client = GooglePubSubClient::new(&config)?;
        Self::with_client(config, Arc::new(client))
    }

    pub fn with_client(
        config: QueueConfig,
        client: Arc<dyn PubSubClientTrait>,
    ) -> Result<Self, JobProducerError> {
        let producer = Arc::new(JobProducer::new(config.clone(), client.clone())?);
        Ok(Self {
            config,
            client,
            producer,
        })
    }

    /// Builds a queue from the environment.
    pub fn setup() -> Result<Self> {
        let config = QueueConfig::from_env()
            .map_err(|e| eyre::eyre!("Failed to load queue configuration: {}", e))?;
        let queue = Self::new(config)
            .map_err(|e| eyre::eyre!("Failed to set up job queue: {}", e))?;
        info!(
            "Job queue ready for project {} (topic suffix: {})",
            queue.config.project_id, queue.config.topic_suffix
        );
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<dyn PubSubClientTrait> {
        self.client.clone()
    }

    pub fn producer(&self) -> Arc<JobProducer> {
        self.producer.clone()
    }

    /// A job bound to this queue's producer. Nothing is published until
    /// [`QueuedJob::save`] is called.
    pub fn create_job(&self, name: impl Into<String>, payload: JobPayload) -> QueuedJob {
        QueuedJob::new(Job::new(name, payload), self.producer.clone())
    }

    pub fn worker(&self) -> Result<Worker, WorkerError> {
        Worker::new(self.config.clone(), self.client.clone())
    }
}
