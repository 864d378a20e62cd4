//! Job producer module for publishing jobs to Pub/Sub topics.
//!
//! Each job name maps to the topic `<name>-<topic_suffix>`. Topics are
//! resolved lazily, created when missing and cached for the producer's
//! lifetime. Publishing runs under the retry policy derived from the
//! [`QueueConfig`].
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    config::{ConfigError, QueueConfig},
    jobs::{with_retry, Envelope, Job, RetryError, RetryPolicy},
    services::{PubSubClientTrait, PubSubError, TopicHandle},
};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum JobProducerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),
    #[error("Failed to serialize job: {0}")]
    Serialization(String),
    #[error("Broker error: {0}")]
    Broker(#[from] PubSubError),
    #[error("Failed to publish job '{job_name}' after {attempts} attempts: {last_error}")]
    PublishFailure {
        job_name: String,
        attempts: usize,
        last_error: PubSubError,
    },
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait JobProducerTrait: Send + Sync {
    /// Publishes `job` and returns the broker message id.
    async fn publish(&self, job: &Job) -> Result<String, JobProducerError>;
}

pub struct JobProducer {
    config: QueueConfig,
    client: Arc<dyn PubSubClientTrait>,
    retry_policy: RetryPolicy,
    /// Keyed by `<project>/<topic name>`.
    topics: Mutex<HashMap<String, TopicHandle>>,
}

impl std::fmt::Debug for JobProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProducer")
            .field("project_id", &self.config.project_id)
            .field("topic_suffix", &self.config.topic_suffix)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl JobProducer {
    /// Fails with a configuration error when credentials or naming settings
    /// are missing, or when the retry delays are inconsistent.
    pub fn new(
        config: QueueConfig,
        client: Arc<dyn PubSubClientTrait>,
    ) -> Result<Self, JobProducerError> {
        config.validate()?;
        let retry_policy = RetryPolicy::from_config(&config)?;

        Ok(Self {
            config,
            client,
            retry_policy,
            topics: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the cached topic for `job_name`, creating it on first use.
    ///
    /// The cache lock is held across the lookup and the create call, so
    /// concurrent callers for the same job name trigger a single create.
    pub async fn resolve_topic(&self, job_name: &str) -> Result<TopicHandle, JobProducerError> {
        let topic_name = self.config.topic_name(job_name);
        let cache_key = format!("{}/{}", self.config.project_id, topic_name);

        let mut topics = self.topics.lock().await;
        if let Some(topic) = topics.get(&cache_key) {
            return Ok(topic.clone());
        }

        let topic = self.client.create_or_get_topic(&topic_name).await?;
        debug!("Resolved topic {} for job {}", topic.path, job_name);
        topics.insert(cache_key, topic.clone());

        Ok(topic)
    }

    pub async fn cached_topics(&self) -> Vec<String> {
        let topics = self.topics.lock().await;
        let mut names: Vec<String> = topics.values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobProducerTrait for JobProducer {
    async fn publish(&self, job: &Job) -> Result<String, JobProducerError> {
        job.validate()?;

        let topic = self.resolve_topic(&job.name).await?;
        let envelope = Envelope::new(job, &topic.name);
        let data = envelope
            .to_bytes()
            .map_err(|e| JobProducerError::Serialization(e.to_string()))?;

        let operation_name = format!("publish {}", topic.name);
        let message_id = with_retry(&operation_name, &self.retry_policy, || {
            self.client
                .publish(&topic, data.clone(), HashMap::new())
        })
        .await
        .map_err(|e: RetryError<PubSubError>| JobProducerError::PublishFailure {
            job_name: job.name.clone(),
            attempts: e.attempts(),
            last_error: e.into_last_error(),
        })?;

        if self.config.debug {
            info!(
                "Published job {} to {} as {}: data={:?}, bytes={}, body={}",
                job.name,
                topic.name,
                message_id,
                job.payload,
                data.len(),
                String::from_utf8_lossy(&data)
            );
        } else {
            debug!("Published job {} as {}", job.name, message_id);
        }

        Ok(message_id)
    }
}
