//! End-to-end tests of producers and workers over the in-memory broker.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use pubsub_jobs::{
    config::{QueueConfig, WorkerOptions},
    jobs::{
        Acknowledger, JobPayload, JobQueue, ReceivedJob, Worker, WorkerError, WorkerEvent,
    },
    models::ServiceAccountCredentials,
    services::{
        InMemoryOperation, InMemoryPubSubClient, PubSubClientTrait, PubSubError, TopicHandle,
    },
};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};

const TOPIC: &str = "projects/test-project/topics/send-email-env1";
const SUBSCRIPTION: &str = "projects/test-project/subscriptions/send-email-sub1";

fn setup(max_retries: usize) -> (JobQueue, InMemoryPubSubClient) {
    let config = QueueConfig::new("test-project", "env1", "sub1")
        .with_credentials(ServiceAccountCredentials::new("svc@example.com", "key"))
        .with_retries(max_retries, 0, 0);
    let client = InMemoryPubSubClient::new("test-project");
    let queue = JobQueue::with_client(config, Arc::new(client.clone())).unwrap();
    (queue, client)
}

fn options(max_messages: usize) -> WorkerOptions {
    WorkerOptions::new(max_messages)
        .with_poll_interval(Duration::from_millis(5))
        .with_nack_deadline_seconds(0)
}

fn payload(i: usize) -> JobPayload {
    json!({ "to": format!("user{}@example.com", i) })
        .as_object()
        .cloned()
        .unwrap()
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn wait_for_inflight(worker: &Worker, expected: usize) {
    eventually(|| async move { worker.inflight("send-email").await == Some(expected) }).await;
}

/// Forwards every delivered job with its acknowledger to the test.
fn forwarding_handler(
) -> (
    impl Fn(ReceivedJob, Acknowledger) -> std::future::Ready<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<(ReceivedJob, Acknowledger)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |job: ReceivedJob, acker: Acknowledger| {
        let _ = tx.send((job, acker));
        std::future::ready(())
    };
    (handler, rx)
}

#[tokio::test]
async fn test_published_job_is_processed_and_acked() {
    let (queue, client) = setup(3);
    let worker = queue.worker().unwrap();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    let message_id = queue
        .create_job("send-email", payload(1))
        .save()
        .await
        .unwrap();

    let (job, acker) = rx.recv().await.unwrap();
    assert_eq!(job.id, message_id);
    assert_eq!(job.get("to").unwrap(), "user1@example.com");
    assert_eq!(job.get("jobId").unwrap(), message_id.as_str());
    assert_eq!(job.topic_name(), Some("send-email-env1"));
    assert!(job.created_at().is_some());
    assert_eq!(job.delivery_attempt, Some(1));

    acker.ack().await.unwrap();

    assert_eq!(client.acknowledged_count(SUBSCRIPTION).await, 1);
    assert_eq!(client.leased_count(SUBSCRIPTION).await, 0);
    wait_for_inflight(&worker, 0).await;

    worker.shutdown().await;
}

#[tokio::test]
async fn test_nacked_job_is_redelivered() {
    let (queue, client) = setup(3);
    let worker = queue.worker().unwrap();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    queue.create_job("send-email", payload(1)).save().await.unwrap();

    let (first, acker) = rx.recv().await.unwrap();
    acker.nack().await.unwrap();

    let (second, acker) = rx.recv().await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.delivery_attempt, Some(2));
    acker.ack().await.unwrap();

    assert_eq!(client.acknowledged_count(SUBSCRIPTION).await, 1);
    assert_eq!(client.call_count(InMemoryOperation::ModifyAckDeadline).await, 1);
    worker.shutdown().await;
}

#[tokio::test]
async fn test_ack_retries_through_transient_failures() {
    let (queue, client) = setup(5);
    let worker = queue.worker().unwrap();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    queue.create_job("send-email", payload(1)).save().await.unwrap();
    let (_job, acker) = rx.recv().await.unwrap();

    client.fail_next(InMemoryOperation::Acknowledge, 3).await;
    acker.ack().await.unwrap();

    assert_eq!(client.call_count(InMemoryOperation::Acknowledge).await, 4);
    assert_eq!(client.acknowledged_count(SUBSCRIPTION).await, 1);
    wait_for_inflight(&worker, 0).await;
    worker.shutdown().await;
}

#[tokio::test]
async fn test_ack_failure_after_exhausted_retries() {
    let (queue, client) = setup(2);
    let worker = queue.worker().unwrap();
    let mut events = worker.subscribe_events();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    queue.create_job("send-email", payload(1)).save().await.unwrap();
    let (_job, acker) = rx.recv().await.unwrap();

    client.fail_next(InMemoryOperation::Acknowledge, 10).await;
    let err = acker.ack().await.unwrap_err();
    assert!(matches!(err, WorkerError::AckFailure { attempts: 3, .. }));

    // The slot is given back even though the message stays leased.
    wait_for_inflight(&worker, 0).await;
    assert_eq!(client.leased_count(SUBSCRIPTION).await, 1);

    let failure = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WorkerEvent::Failed(e)) = events.recv().await {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failure, err);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_flow_control_bounds_concurrency() {
    let (queue, client) = setup(3);
    let worker = queue.worker().unwrap();

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let (a, p, d) = (active.clone(), peak.clone(), processed.clone());

    worker
        .process(
            "send-email",
            move |_job: ReceivedJob, acker: Acknowledger| {
                let (active, peak, processed) = (a.clone(), p.clone(), d.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    acker.ack().await.unwrap();
                    processed.fetch_add(1, Ordering::SeqCst);
                }
            },
            options(2),
        )
        .await
        .unwrap();

    for i in 0..6 {
        queue.create_job("send-email", payload(i)).save().await.unwrap();
    }

    eventually(|| {
        let processed = processed.clone();
        async move { processed.load(Ordering::SeqCst) == 6 }
    })
    .await;

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(client.acknowledged_count(SUBSCRIPTION).await, 6);
    worker.shutdown().await;
}

#[tokio::test]
async fn test_dropped_acknowledger_releases_slot() {
    let (queue, _client) = setup(3);
    let worker = queue.worker().unwrap();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    queue.create_job("send-email", payload(1)).save().await.unwrap();
    let (_job, acker) = rx.recv().await.unwrap();
    wait_for_inflight(&worker, 1).await;

    drop(acker);
    wait_for_inflight(&worker, 0).await;
    worker.shutdown().await;
}

#[tokio::test]
async fn test_malformed_message_is_reported() {
    let (queue, client) = setup(3);
    let worker = queue.worker().unwrap();
    let mut events = worker.subscribe_events();
    let (handler, mut rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();

    let topic = TopicHandle::new("test-project", "send-email-env1");
    client
        .publish(&topic, b"plain text".to_vec(), HashMap::new())
        .await
        .unwrap();

    let message_id = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WorkerEvent::Failed(WorkerError::MalformedMessage { message_id, .. })) =
                events.recv().await
            {
                return message_id;
            }
        }
    })
    .await
    .unwrap();

    assert!(!message_id.is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(client.acknowledged_count(SUBSCRIPTION).await, 0);
    wait_for_inflight(&worker, 0).await;
    worker.shutdown().await;
}

#[tokio::test]
async fn test_publish_retries_through_transient_failures() {
    let (queue, client) = setup(3);
    client.fail_next(InMemoryOperation::Publish, 2).await;

    queue.create_job("send-email", payload(1)).save().await.unwrap();

    assert_eq!(client.call_count(InMemoryOperation::Publish).await, 3);
    assert_eq!(client.published_count(TOPIC).await, 1);
    assert_eq!(client.call_count(InMemoryOperation::CreateTopic).await, 1);
}

#[tokio::test]
async fn test_shutdown_clears_subscriptions() {
    let (queue, client) = setup(3);
    let worker = queue.worker().unwrap();
    let (handler, _rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();
    assert_eq!(worker.active_subscriptions().await, vec!["send-email"]);

    worker.shutdown().await;
    assert!(worker.active_subscriptions().await.is_empty());

    let pulls = client.call_count(InMemoryOperation::Pull).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(client.call_count(InMemoryOperation::Pull).await, pulls);

    // Broker resources outlive the worker.
    assert_eq!(client.subscription_names().await, vec![SUBSCRIPTION]);
}

#[tokio::test]
async fn test_subscription_left_on_previous_topic_is_refused() {
    let client = InMemoryPubSubClient::new("test-project");
    let previous = QueueConfig::new("test-project", "old", "sub1")
        .with_credentials(ServiceAccountCredentials::new("svc@example.com", "key"));
    let previous = JobQueue::with_client(previous, Arc::new(client.clone())).unwrap();
    let worker = previous.worker().unwrap();
    let (handler, _rx) = forwarding_handler();
    worker.process("send-email", handler, options(1)).await.unwrap();
    worker.shutdown().await;

    // Same subscription suffix, new topic suffix.
    let config = QueueConfig::new("test-project", "env1", "sub1")
        .with_credentials(ServiceAccountCredentials::new("svc@example.com", "key"));
    let queue = JobQueue::with_client(config, Arc::new(client.clone())).unwrap();
    let worker = queue.worker().unwrap();
    let (handler, _rx) = forwarding_handler();
    let err = worker
        .process("send-email", handler, options(1))
        .await
        .unwrap_err();

    match err {
        WorkerError::Subscription {
            error: PubSubError::TopicMismatch { expected, actual, .. },
            ..
        } => {
            assert_eq!(expected, TOPIC);
            assert_eq!(actual, "projects/test-project/topics/send-email-old");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(worker.active_subscriptions().await.is_empty());
}
