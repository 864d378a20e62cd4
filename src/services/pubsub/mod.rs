//! # Pub/Sub Broker Client Module
//!
//! Narrow interface the job queue uses to talk to the messaging service.
//!
//! ## Implementations
//!
//! - [`GooglePubSubClient`]: Google Cloud Pub/Sub REST API (or its emulator)
//! - [`InMemoryPubSubClient`]: process-local broker with lease and redelivery
//!   semantics, for local development and tests
//!
//! All create operations are idempotent: asking for a topic or subscription
//! that already exists returns a handle to the existing resource.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::constants::DEFAULT_ACK_DEADLINE_SECONDS;

mod google;
pub use google::*;

mod in_memory;
pub use in_memory::*;

#[derive(Debug, Clone, Error, Serialize, PartialEq)]
pub enum PubSubError {
    #[error("Pub/Sub HTTP error: {0}")]
    HttpError(String),
    #[error("Pub/Sub API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Pub/Sub resource not found: {0}")]
    NotFound(String),
    #[error("Pub/Sub response parse error: {0}")]
    ParseError(String),
    #[error("Pub/Sub missing field: {0}")]
    MissingField(String),
    #[error("Pub/Sub auth error: {0}")]
    AuthError(String),
    #[error("Subscription {subscription} is bound to {actual}, expected {expected}")]
    TopicMismatch {
        subscription: String,
        expected: String,
        actual: String,
    },
    #[error("Other error: {0}")]
    Other(String),
}

impl PubSubError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, PubSubError::ApiError { status: 409, .. })
    }
}

pub type PubSubResult<T> = Result<T, PubSubError>;

/// A topic known to exist on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    /// Short name, e.g. `send-email-prod`.
    pub name: String,
    /// Fully qualified name, e.g. `projects/p/topics/send-email-prod`.
    pub path: String,
}

impl TopicHandle {
    pub fn new(project_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: topic_path(project_id, name),
        }
    }
}

/// A subscription known to exist on the broker, bound to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub name: String,
    pub path: String,
    /// Fully qualified name of the topic the subscription is attached to.
    pub topic: String,
}

impl SubscriptionHandle {
    pub fn new(project_id: &str, name: &str, topic: &TopicHandle) -> Self {
        Self {
            name: name.to_string(),
            path: subscription_path(project_id, name),
            topic: topic.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub ack_deadline_seconds: u32,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            ack_deadline_seconds: DEFAULT_ACK_DEADLINE_SECONDS,
        }
    }
}

/// A message handed out by a pull, leased until acked or its deadline expires.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub attributes: HashMap<String, String>,
    /// Decoded payload, or the reason it could not be decoded.
    pub data: Result<Vec<u8>, String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub delivery_attempt: Option<u32>,
}

pub fn topic_path(project_id: &str, name: &str) -> String {
    format!("projects/{}/topics/{}", project_id, name)
}

pub fn subscription_path(project_id: &str, name: &str) -> String {
    format!("projects/{}/subscriptions/{}", project_id, name)
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait PubSubClientTrait: Send + Sync {
    /// Returns the topic called `name`, creating it when missing.
    async fn create_or_get_topic(&self, name: &str) -> PubSubResult<TopicHandle>;

    /// Returns the subscription called `name` on `topic`, creating it when missing.
    async fn create_or_get_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        options: SubscriptionOptions,
    ) -> PubSubResult<SubscriptionHandle>;

    /// Publishes one message and returns the broker-assigned message id.
    async fn publish(
        &self,
        topic: &TopicHandle,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> PubSubResult<String>;

    /// Pulls at most `max_messages` messages. May return fewer, or none.
    async fn pull(
        &self,
        subscription: &SubscriptionHandle,
        max_messages: usize,
    ) -> PubSubResult<Vec<ReceivedMessage>>;

    async fn acknowledge(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
    ) -> PubSubResult<()>;

    /// Resets the ack deadline of leased messages. Zero makes them
    /// immediately available for redelivery.
    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
        ack_deadline_seconds: u32,
    ) -> PubSubResult<()>;
}
