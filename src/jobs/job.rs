//! Job, wire envelope and received job structures.
//!
//! A published message body is the job payload flattened into a JSON object
//! together with two envelope fields:
//!
//! ```json
//! { "payload": "foo", "topicName": "test-env1", "createdAt": "2024-05-01T10:00:00.123Z" }
//! ```
use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{JobProducerError, JobProducerTrait};
use crate::constants::{ENVELOPE_CREATED_AT_FIELD, ENVELOPE_TOPIC_NAME_FIELD, JOB_ID_FIELD};

/// Job payload: arbitrary JSON fields.
pub type JobPayload = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum EnvelopeError {
    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Message body is not a JSON object")]
    NotAnObject,
    #[error("Message data could not be decoded: {0}")]
    InvalidEncoding(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub payload: JobPayload,
}

impl Job {
    pub fn new(name: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Builds a job from any JSON value. Only objects are accepted as payloads.
    pub fn from_value(name: impl Into<String>, payload: Value) -> Result<Self, JobProducerError> {
        match payload {
            Value::Object(payload) => Ok(Self::new(name, payload)),
            other => Err(JobProducerError::InvalidJob(format!(
                "payload must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), JobProducerError> {
        if self.name.trim().is_empty() {
            return Err(JobProducerError::InvalidJob(
                "job name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Publishes the job through `producer` and returns the message id.
    pub async fn save<P>(&self, producer: &P) -> Result<String, JobProducerError>
    where
        P: JobProducerTrait + ?Sized,
    {
        producer.publish(self).await
    }
}

/// A job bound to the producer that will publish it.
#[derive(Clone)]
pub struct QueuedJob {
    job: Job,
    producer: Arc<dyn JobProducerTrait>,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob").field("job", &self.job).finish()
    }
}

impl QueuedJob {
    pub fn new(job: Job, producer: Arc<dyn JobProducerTrait>) -> Self {
        Self { job, producer }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub async fn save(&self) -> Result<String, JobProducerError> {
        self.job.save(self.producer.as_ref()).await
    }
}

/// Body of a published message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic_name: String,
    pub created_at: DateTime<Utc>,
    pub payload: JobPayload,
}

impl Envelope {
    pub fn new(job: &Job, topic_name: &str) -> Self {
        Self {
            topic_name: topic_name.to_string(),
            created_at: Utc::now(),
            payload: job.payload.clone(),
        }
    }

    /// Flattens the payload and adds the envelope fields, which replace
    /// payload keys of the same name.
    pub fn to_json(&self) -> Value {
        let mut body = self.payload.clone();
        body.insert(
            ENVELOPE_TOPIC_NAME_FIELD.to_string(),
            Value::String(self.topic_name.clone()),
        );
        body.insert(
            ENVELOPE_CREATED_AT_FIELD.to_string(),
            Value::String(self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(body)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_json())
    }
}

/// Parses a message body, which must be a JSON object.
pub fn parse_message_body(data: &[u8]) -> Result<JobPayload, EnvelopeError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
    match value {
        Value::Object(body) => Ok(body),
        _ => Err(EnvelopeError::NotAnObject),
    }
}

/// A job handed to a worker handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedJob {
    /// Broker message id.
    pub id: String,
    pub name: String,
    /// Message attributes, then the message body, then `jobId`.
    pub data: JobPayload,
    pub publish_time: Option<DateTime<Utc>>,
    pub delivery_attempt: Option<u32>,
}

impl ReceivedJob {
    pub fn new(
        name: &str,
        message_id: &str,
        attributes: &HashMap<String, String>,
        body: JobPayload,
    ) -> Self {
        let mut data: JobPayload = attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        data.extend(body);
        data.insert(
            JOB_ID_FIELD.to_string(),
            Value::String(message_id.to_string()),
        );

        Self {
            id: message_id.to_string(),
            name: name.to_string(),
            data,
            publish_time: None,
            delivery_attempt: None,
        }
    }

    pub fn with_publish_time(mut self, publish_time: Option<DateTime<Utc>>) -> Self {
        self.publish_time = publish_time;
        self
    }

    pub fn with_delivery_attempt(mut self, delivery_attempt: Option<u32>) -> Self {
        self.delivery_attempt = delivery_attempt;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn topic_name(&self) -> Option<&str> {
        self.data.get(ENVELOPE_TOPIC_NAME_FIELD).and_then(Value::as_str)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.data
            .get(ENVELOPE_CREATED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Deserializes the job data into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }
}
