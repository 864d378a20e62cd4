//! Process-local broker.
//!
//! Keeps topics and subscriptions in memory and mimics the lease behaviour of
//! Pub/Sub: pulled messages are leased until acknowledged, and a lease whose
//! deadline passes puts the message back in line with its delivery attempt
//! incremented.
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use strum::Display;
use tokio::{sync::Mutex, time::Instant};

use super::{
    PubSubClientTrait, PubSubError, PubSubResult, ReceivedMessage, SubscriptionHandle,
    SubscriptionOptions, TopicHandle,
};

/// Broker operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum InMemoryOperation {
    CreateTopic,
    CreateSubscription,
    Publish,
    Pull,
    Acknowledge,
    ModifyAckDeadline,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    data: Vec<u8>,
    attributes: HashMap<String, String>,
    publish_time: DateTime<Utc>,
    delivery_attempt: u32,
}

#[derive(Debug)]
struct Lease {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug)]
struct SubscriptionState {
    topic: String,
    ack_deadline: Duration,
    pending: VecDeque<StoredMessage>,
    leased: HashMap<String, Lease>,
    acknowledged: usize,
}

impl SubscriptionState {
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(lease) = self.leased.remove(&ack_id) {
                self.pending.push_front(lease.message);
            }
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, SubscriptionState>,
    published: HashMap<String, usize>,
    failures: HashMap<InMemoryOperation, usize>,
    calls: HashMap<InMemoryOperation, usize>,
    next_message_id: u64,
    next_ack_id: u64,
}

impl BrokerState {
    fn record_call(&mut self, operation: InMemoryOperation) -> PubSubResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self.failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(PubSubError::Other(format!("injected {} failure", operation)))
            }
            _ => Ok(()),
        }
    }

    fn subscription_mut(&mut self, path: &str) -> PubSubResult<&mut SubscriptionState> {
        self.subscriptions
            .get_mut(path)
            .ok_or_else(|| PubSubError::NotFound(path.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryPubSubClient {
    project_id: String,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryPubSubClient {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// Makes the next `times` calls of `operation` fail.
    pub async fn fail_next(&self, operation: InMemoryOperation, times: usize) {
        let mut state = self.state.lock().await;
        state.failures.insert(operation, times);
    }

    /// Number of calls made to `operation`, failed ones included.
    pub async fn call_count(&self, operation: InMemoryOperation) -> usize {
        let state = self.state.lock().await;
        state.calls.get(&operation).copied().unwrap_or_default()
    }

    pub async fn topic_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn subscription_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.subscriptions.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn published_count(&self, topic_path: &str) -> usize {
        let state = self.state.lock().await;
        state.published.get(topic_path).copied().unwrap_or_default()
    }

    /// Messages waiting to be pulled, expired leases included.
    pub async fn pending_count(&self, subscription_path: &str) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state
            .subscriptions
            .get_mut(subscription_path)
            .map(|sub| {
                sub.expire_leases(now);
                sub.pending.len()
            })
            .unwrap_or_default()
    }

    pub async fn leased_count(&self, subscription_path: &str) -> usize {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(subscription_path)
            .map(|sub| sub.leased.len())
            .unwrap_or_default()
    }

    pub async fn acknowledged_count(&self, subscription_path: &str) -> usize {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(subscription_path)
            .map(|sub| sub.acknowledged)
            .unwrap_or_default()
    }
}

#[async_trait]
impl PubSubClientTrait for InMemoryPubSubClient {
    async fn create_or_get_topic(&self, name: &str) -> PubSubResult<TopicHandle> {
        let mut state = self.state.lock().await;
        state.record_call(InMemoryOperation::CreateTopic)?;

        let handle = TopicHandle::new(&self.project_id, name);
        state.topics.entry(handle.path.clone()).or_default();
        Ok(handle)
    }

    async fn create_or_get_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        options: SubscriptionOptions,
    ) -> PubSubResult<SubscriptionHandle> {
        let mut state = self.state.lock().await;
        state.record_call(InMemoryOperation::CreateSubscription)?;

        if !state.topics.contains_key(&topic.path) {
            return Err(PubSubError::NotFound(topic.path.clone()));
        }

        let handle = SubscriptionHandle::new(&self.project_id, name, topic);
        if let Some(existing) = state.subscriptions.get(&handle.path) {
            if existing.topic != topic.path {
                return Err(PubSubError::TopicMismatch {
                    subscription: handle.path,
                    expected: topic.path.clone(),
                    actual: existing.topic.clone(),
                });
            }
        } else {
            state.subscriptions.insert(
                handle.path.clone(),
                SubscriptionState {
                    topic: topic.path.clone(),
                    ack_deadline: Duration::from_secs(options.ack_deadline_seconds.into()),
                    pending: VecDeque::new(),
                    leased: HashMap::new(),
                    acknowledged: 0,
                },
            );
            if let Some(subs) = state.topics.get_mut(&topic.path) {
                subs.push(handle.path.clone());
            }
            debug!("Created in-memory subscription {}", handle.path);
        }

        Ok(handle)
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> PubSubResult<String> {
        let mut state = self.state.lock().await;
        state.record_call(InMemoryOperation::Publish)?;

        let subscriptions = state
            .topics
            .get(&topic.path)
            .cloned()
            .ok_or_else(|| PubSubError::NotFound(topic.path.clone()))?;

        state.next_message_id += 1;
        let message = StoredMessage {
            message_id: state.next_message_id.to_string(),
            data,
            attributes,
            publish_time: Utc::now(),
            delivery_attempt: 0,
        };

        for path in subscriptions {
            if let Some(sub) = state.subscriptions.get_mut(&path) {
                sub.pending.push_back(message.clone());
            }
        }
        *state.published.entry(topic.path.clone()).or_default() += 1;

        Ok(message.message_id)
    }

    async fn pull(
        &self,
        subscription: &SubscriptionHandle,
        max_messages: usize,
    ) -> PubSubResult<Vec<ReceivedMessage>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.record_call(InMemoryOperation::Pull)?;

        let now = Instant::now();
        let sub = state
            .subscriptions
            .get_mut(&subscription.path)
            .ok_or_else(|| PubSubError::NotFound(subscription.path.clone()))?;
        sub.expire_leases(now);

        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some(mut message) = sub.pending.pop_front() else {
                break;
            };
            message.delivery_attempt += 1;
            state.next_ack_id += 1;
            let ack_id = format!("{}-{}", message.message_id, state.next_ack_id);

            received.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: message.message_id.clone(),
                attributes: message.attributes.clone(),
                data: Ok(message.data.clone()),
                publish_time: Some(message.publish_time),
                delivery_attempt: Some(message.delivery_attempt),
            });
            sub.leased.insert(
                ack_id,
                Lease {
                    message,
                    deadline: now + sub.ack_deadline,
                },
            );
        }

        Ok(received)
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
    ) -> PubSubResult<()> {
        let mut state = self.state.lock().await;
        state.record_call(InMemoryOperation::Acknowledge)?;

        let sub = state.subscription_mut(&subscription.path)?;
        for ack_id in ack_ids {
            // Unknown or expired ack ids are ignored, as Pub/Sub does.
            if sub.leased.remove(&ack_id).is_some() {
                sub.acknowledged += 1;
            }
        }
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: Vec<String>,
        ack_deadline_seconds: u32,
    ) -> PubSubResult<()> {
        let mut state = self.state.lock().await;
        state.record_call(InMemoryOperation::ModifyAckDeadline)?;

        let deadline = Instant::now() + Duration::from_secs(ack_deadline_seconds.into());
        let sub = state.subscription_mut(&subscription.path)?;
        for ack_id in ack_ids {
            if let Some(lease) = sub.leased.get_mut(&ack_id) {
                lease.deadline = deadline;
            }
        }
        Ok(())
    }
}
