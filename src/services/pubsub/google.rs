//! # Google Cloud Pub/Sub REST client
//!
//! Talks to the Pub/Sub v1 REST API with service account credentials, or to
//! the Pub/Sub emulator without authentication.
//!
//! ```text
//! GooglePubSubClient (implements PubSubClientTrait)
//!   ├── Authentication (service account, cached headers)
//!   ├── Topics        GET / PUT  v1/projects/{p}/topics/{t}
//!   ├── Subscriptions GET / PUT  v1/projects/{p}/subscriptions/{s}
//!   └── Messages      POST {topic}:publish, {sub}:pull, :acknowledge, :modifyAckDeadline
//! ```
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_cloud_auth::credentials::{service_account::Builder as GcpCredBuilder, Credentials};
use http::{Extensions, HeaderMap};
use log::{debug, warn};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    PubSubClientTrait, PubSubError, PubSubResult, ReceivedMessage, SubscriptionHandle,
    SubscriptionOptions, TopicHandle,
};
use crate::{
    config::QueueConfig,
    utils::{base64_decode, base64_encode},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WirePubsubMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
}

impl From<WireReceivedMessage> for ReceivedMessage {
    fn from(wire: WireReceivedMessage) -> Self {
        let data = base64_decode(&wire.message.data)
            .map_err(|e| format!("invalid base64 data: {}", e));

        ReceivedMessage {
            ack_id: wire.ack_id,
            message_id: wire.message.message_id,
            attributes: wire.message.attributes,
            data,
            publish_time: wire.message.publish_time,
            delivery_attempt: wire.delivery_attempt,
        }
    }
}

#[derive(Clone)]
pub struct GooglePubSubClient {
    project_id: String,
    base_url: String,
    /// `None` when talking to the emulator.
    credentials: Option<Arc<Credentials>>,
    client: Client,
    cached_headers: Arc<RwLock<Option<HeaderMap>>>,
}

impl std::fmt::Debug for GooglePubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GooglePubSubClient")
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl GooglePubSubClient {
    pub fn new(config: &QueueConfig) -> PubSubResult<Self> {
        let credentials = match (&config.emulator_host, &config.credentials) {
            (Some(_), _) => None,
            (None, Some(creds)) => {
                let credentials = GcpCredBuilder::new(
                    creds.to_service_account_json(&config.project_id),
                )
                .build()
                .map_err(|e| PubSubError::AuthError(e.to_string()))?;
                Some(Arc::new(credentials))
            }
            (None, None) => {
                return Err(PubSubError::AuthError(
                    "service account credentials are required outside the emulator".to_string(),
                ))
            }
        };

        Ok(Self {
            project_id: config.project_id.clone(),
            base_url: config.base_url(),
            credentials,
            client: Client::new(),
            cached_headers: Arc::new(RwLock::new(None)),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn get_auth_headers(&self) -> PubSubResult<HeaderMap> {
        let Some(credentials) = &self.credentials else {
            return Ok(HeaderMap::new());
        };

        let cacheable_headers = credentials
            .headers(Extensions::new())
            .await
            .map_err(|e| PubSubError::AuthError(e.to_string()))?;

        match cacheable_headers {
            google_cloud_auth::credentials::CacheableResource::New { data, .. } => {
                let mut cached = self.cached_headers.write().await;
                *cached = Some(data.clone());
                Ok(data)
            }
            google_cloud_auth::credentials::CacheableResource::NotModified => {
                let cached = self.cached_headers.read().await;
                cached.as_ref().cloned().ok_or_else(|| {
                    PubSubError::AuthError(
                        "auth token not modified, but not found in cache".to_string(),
                    )
                })
            }
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.base_url, resource)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> PubSubResult<Value> {
        let headers = self.get_auth_headers().await?;
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PubSubError::HttpError(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return Err(PubSubError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(PubSubError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }

        serde_json::from_str(&text).map_err(|e| PubSubError::ParseError(format!("{}: {}", e, text)))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(&self, url: &str, body: &Value) -> PubSubResult<T> {
        let value = self.send(Method::POST, url, Some(body)).await?;
        serde_json::from_value(value).map_err(|e| PubSubError::ParseError(e.to_string()))
    }
}

/// Fails when an existing subscription listens to another topic than `handle.topic`.
fn check_binding(handle: SubscriptionHandle, existing: &Value) -> PubSubResult<SubscriptionHandle> {
    let bound_topic = existing
        .get("topic")
        .and_then(Value::as_str)
        .ok_or_else(|| PubSubError::MissingField("topic".to_string()))?;

    if bound_topic != handle.topic {
        warn!(
            "Subscription {} is bound to {}, expected {}",
            handle.path, bound_topic, handle.topic
        );
        return Err(PubSubError::TopicMismatch {
            subscription: handle.path,
            expected: handle.topic,
            actual: bound_topic.to_string(),
        });
    }

    debug!("Found existing subscription {}", handle.path);
    Ok(handle)
}

#[async_trait]
impl PubSubClientTrait for GooglePubSubClient {
    async fn create_or_get_topic(&self, name: &str) -> PubSubResult<TopicHandle> {
        let handle = TopicHandle::new(&self.project_id, name);
        let url = self.url(&handle.path);

        match self.send(Method::GET, &url, None).await {
            Ok(_) => {
                debug!("Found existing topic {}", handle.path);
                return Ok(handle);
            }
            Err(PubSubError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.send(Method::PUT, &url, Some(&serde_json::json!({}))).await {
            Ok(_) => {
                debug!("Created topic {}", handle.path);
                Ok(handle)
            }
            // Created concurrently by another process.
            Err(e) if e.is_already_exists() => Ok(handle),
            Err(e) => Err(e),
        }
    }

    async fn create_or_get_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        options: SubscriptionOptions,
    ) -> PubSubResult<SubscriptionHandle> {
        let handle = SubscriptionHandle::new(&self.project_id, name, topic);
        let url = self.url(&handle.path);

        match self.send(Method::GET, &url, None).await {
            Ok(existing) => return check_binding(handle, &existing),
            Err(PubSubError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let body = serde_json::json!({
            "topic": topic.path,
            "ackDeadlineSeconds": options.ack_deadline_seconds,
        });
        match self.send(Method::PUT, &url, Some(&body)).await {
            Ok(_) => {
                debug!("Created subscription {} on {}", handle.path, topic.path);
                Ok(handle)
            }
            Err(e) if e.is_already_exists() => {
                let existing = self.send(Method::GET, &url, None).await?;
                check_binding(handle, &existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> PubSubResult<String> {
        let url = format!("{}:publish", self.url(&topic.path));
        let body = serde_json::json!({
            "messages": [OutgoingMessage {
                data: base64_encode(&data),
                attributes,
            }]
        });

        let resp: PublishResponse = self.post_json(&url, &body).await?;
        resp.message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PubSubError::MissingField("messageIds".to_string()))
    }

    async fn pull(
        &self,
        subscription: &SubscriptionHandle,
        max_messages: usize,
    ) -> PubSubResult<Vec<ReceivedMessage>> {
        let url = format!("{}:pull", self.url(&subscription.path));
        let body = serde_json::json!({ "maxMessages": max_messages });

        let resp: PullResponse = self.post_json(&url, &body).await?;
        Ok(resp
            .received_messages
            .into_iter()
            .map(ReceivedMessage::from)
            .collect())
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
    ) -> PubSubResult<()> {
        let url = format!("{}:acknowledge", self.url(&subscription.path));
        let body = serde_json::json!({ "ackIds": ack_ids });
        self.send(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
        ack_deadline_seconds: u32,
    ) -> PubSubResult<()> {
        let url = format!("{}:modifyAckDeadline", self.url(&subscription.path));
        let body = serde_json::json!({
            "ackIds": ack_ids,
            "ackDeadlineSeconds": ack_deadline_seconds,
        });
        self.send(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }
}
