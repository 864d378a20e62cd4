//! # Worker
//!
//! Consumes jobs from Pub/Sub subscriptions.
//!
//! [`Worker::process`] resolves the subscription `<job>-<subscription_suffix>`
//! on the topic `<job>-<topic_suffix>` and starts a poll loop for it. Each
//! tick of the loop:
//!
//! 1. skips when the in-flight window is full,
//! 2. otherwise takes a slot and pulls up to `bulk_size` messages,
//! 3. gives the slot back when nothing was pulled,
//! 4. hands every message to the job handler on its own task.
//!
//! The handler settles each message through its [`Acknowledger`]. Pull
//! failures and malformed messages never stop the loop; they are logged and
//! broadcast as [`WorkerEvent`]s.
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch, Mutex, OnceCell, RwLock},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use super::{
    parse_message_body, AckContext, Acknowledger, BatchLease, Delivery, EnvelopeError,
    ReceivedJob, RetryPolicy,
};
use crate::{
    config::{ConfigError, QueueConfig, WorkerOptions},
    constants::WORKER_EVENT_CHANNEL_CAPACITY,
    services::{
        PubSubClientTrait, PubSubError, ReceivedMessage, SubscriptionHandle, SubscriptionOptions,
    },
};

#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Failed to resolve subscription for job '{job_name}': {error}")]
    Subscription { job_name: String, error: PubSubError },
    #[error("Failed to pull messages for job '{job_name}': {error}")]
    PullFailure { job_name: String, error: PubSubError },
    #[error("Malformed message {message_id} for job '{job_name}': {error}")]
    MalformedMessage {
        job_name: String,
        message_id: String,
        error: EnvelopeError,
    },
    #[error("Failed to ack message {message_id} of job '{job_name}' after {attempts} attempts: {last_error}")]
    AckFailure {
        job_name: String,
        message_id: String,
        attempts: usize,
        last_error: PubSubError,
    },
    #[error("Failed to nack message {message_id} of job '{job_name}' after {attempts} attempts: {last_error}")]
    NackFailure {
        job_name: String,
        message_id: String,
        attempts: usize,
        last_error: PubSubError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WorkerEvent {
    Started { job_name: String, subscription: String },
    Acked { job_name: String, message_id: String },
    Nacked { job_name: String, message_id: String },
    Failed(WorkerError),
    Stopped { job_name: String },
}

/// Processes one delivered job. The handler settles the message through
/// `acker`; a handler that returns without settling leaves the message to
/// be redelivered after its ack deadline.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: ReceivedJob, acker: Acknowledger);
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(ReceivedJob, Acknowledger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, job: ReceivedJob, acker: Acknowledger) {
        (self)(job, acker).await
    }
}

#[derive(Debug, Clone)]
struct ActiveSubscription {
    handle: SubscriptionHandle,
    ack_deadline_seconds: u32,
    inflight: Arc<AtomicUsize>,
}

pub struct Worker {
    config: QueueConfig,
    client: Arc<dyn PubSubClientTrait>,
    retry_policy: RetryPolicy,
    /// Keyed by job name. Each entry is resolved at most once, under its own cell.
    subscriptions: Mutex<HashMap<String, Arc<OnceCell<ActiveSubscription>>>>,
    /// Held shared by `process` and exclusively by `shutdown`.
    lifecycle: RwLock<()>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    events: broadcast::Sender<WorkerEvent>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("project_id", &self.config.project_id)
            .field("subscription_suffix", &self.config.subscription_suffix)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl Worker {
    pub fn new(
        config: QueueConfig,
        client: Arc<dyn PubSubClientTrait>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let retry_policy = RetryPolicy::from_config(&config)?;
        let (shutdown_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(WORKER_EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            client,
            retry_policy,
            subscriptions: Mutex::new(HashMap::new()),
            lifecycle: RwLock::new(()),
            loops: Mutex::new(Vec::new()),
            shutdown_tx,
            events,
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Job names with a cached subscription.
    pub async fn active_subscriptions(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().await;
        let mut names: Vec<String> = subscriptions
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Pull batches currently holding a slot for `job_name`.
    pub async fn inflight(&self, job_name: &str) -> Option<usize> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions
            .get(job_name)
            .and_then(|cell| cell.get())
            .map(|sub| sub.inflight.load(Ordering::SeqCst))
    }

    /// Starts consuming `job_name` with `handler`.
    ///
    /// Returns once the subscription exists and the poll loop is running.
    /// Calling it again for the same job name starts another loop sharing
    /// the subscription and its in-flight counter; the ack deadline must
    /// then match the one the subscription was resolved with. Waits while
    /// a shutdown is in progress.
    pub async fn process<H>(
        &self,
        job_name: &str,
        handler: H,
        options: WorkerOptions,
    ) -> Result<(), WorkerError>
    where
        H: JobHandler,
    {
        options.validate()?;
        let _running = self.lifecycle.read().await;
        let active = self.resolve_subscription(job_name, &options).await?;
        if active.ack_deadline_seconds != options.ack_deadline_seconds {
            return Err(ConfigError::invalid(
                "ack_deadline_seconds",
                format!(
                    "subscription {} of job {} already uses {} seconds, got {}",
                    active.handle.name,
                    job_name,
                    active.ack_deadline_seconds,
                    options.ack_deadline_seconds
                ),
            )
            .into());
        }

        let poll_loop = PollLoop {
            job_name: job_name.to_string(),
            subscription: active.handle.clone(),
            inflight: active.inflight,
            options,
            handler: Arc::new(handler),
            ack_context: AckContext {
                client: self.client.clone(),
                retry_policy: self.retry_policy,
                nack_deadline_seconds: options.nack_deadline_seconds,
                events: self.events.clone(),
                debug: self.config.debug,
            },
        };

        info!(
            "Processing job {} from {} (max in progress: {}, bulk size: {})",
            job_name,
            active.handle.path,
            options.flow_control.max_messages,
            options.bulk_size
        );
        let _ = self.events.send(WorkerEvent::Started {
            job_name: job_name.to_string(),
            subscription: active.handle.name.clone(),
        });

        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(poll_loop.run(shutdown_rx));
        self.loops.lock().await.push(handle);

        Ok(())
    }

    /// Stops every poll loop, waits for them to exit and clears the
    /// subscription cache. Handlers already running keep their
    /// acknowledgers and may still settle their messages.
    ///
    /// `process` calls already in flight complete first and their loops are
    /// stopped too.
    pub async fn shutdown(&self) {
        let _exclusive = self.lifecycle.write().await;
        let loops = std::mem::take(&mut *self.loops.lock().await);
        if !loops.is_empty() {
            self.shutdown_tx.send_replace(true);
            for handle in loops {
                if let Err(e) = handle.await {
                    error!("Poll loop ended abnormally: {}", e);
                }
            }
        }

        let mut subscriptions = self.subscriptions.lock().await;
        for (job_name, cell) in subscriptions.drain() {
            if let Some(sub) = cell.get() {
                info!(
                    "Shutting down the subscription {} of job {}",
                    sub.handle.path, job_name
                );
            }
        }
        drop(subscriptions);
        self.shutdown_tx.send_replace(false);
    }

    async fn resolve_subscription(
        &self,
        job_name: &str,
        options: &WorkerOptions,
    ) -> Result<ActiveSubscription, WorkerError> {
        let cell = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.entry(job_name.to_string()).or_default().clone()
        };

        let active = cell
            .get_or_try_init(|| self.create_subscription(job_name, options))
            .await?;
        Ok(active.clone())
    }

    async fn create_subscription(
        &self,
        job_name: &str,
        options: &WorkerOptions,
    ) -> Result<ActiveSubscription, WorkerError> {
        let to_error = |error| WorkerError::Subscription {
            job_name: job_name.to_string(),
            error,
        };
        let topic = self
            .client
            .create_or_get_topic(&self.config.topic_name(job_name))
            .await
            .map_err(to_error)?;
        let handle = self
            .client
            .create_or_get_subscription(
                &topic,
                &self.config.subscription_name(job_name),
                SubscriptionOptions {
                    ack_deadline_seconds: options.ack_deadline_seconds,
                },
            )
            .await
            .map_err(to_error)?;

        debug!("Resolved subscription {} for job {}", handle.path, job_name);
        Ok(ActiveSubscription {
            handle,
            ack_deadline_seconds: options.ack_deadline_seconds,
            inflight: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct PollLoop {
    job_name: String,
    subscription: SubscriptionHandle,
    inflight: Arc<AtomicUsize>,
    options: WorkerOptions,
    handler: Arc<dyn JobHandler>,
    ack_context: AckContext,
}

impl PollLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // Sender gone means the worker was dropped.
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        debug!("Poll loop for job {} stopped", self.job_name);
        let _ = self.ack_context.events.send(WorkerEvent::Stopped {
            job_name: self.job_name.clone(),
        });
    }

    async fn poll_once(&self) {
        let Some(lease) =
            BatchLease::acquire(self.inflight.clone(), self.options.flow_control.max_messages)
        else {
            return;
        };

        let messages = match self
            .ack_context
            .client
            .pull(&self.subscription, self.options.bulk_size)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to pull messages for job {}: {}", self.job_name, e);
                self.emit(WorkerEvent::Failed(WorkerError::PullFailure {
                    job_name: self.job_name.clone(),
                    error: e,
                }));
                return;
            }
        };

        if messages.is_empty() {
            return;
        }

        let lease = Arc::new(lease);
        for message in messages {
            self.dispatch(message, lease.clone());
        }
    }

    fn dispatch(&self, message: ReceivedMessage, lease: Arc<BatchLease>) {
        let body = match message
            .data
            .as_deref()
            .map_err(|e| EnvelopeError::InvalidEncoding(e.clone()))
            .and_then(parse_message_body)
        {
            Ok(body) => body,
            Err(e) => {
                // Left unacked so the broker redelivers it after its deadline.
                warn!(
                    "Skipping malformed message {} for job {}: {}",
                    message.message_id, self.job_name, e
                );
                self.emit(WorkerEvent::Failed(WorkerError::MalformedMessage {
                    job_name: self.job_name.clone(),
                    message_id: message.message_id,
                    error: e,
                }));
                return;
            }
        };

        let job = ReceivedJob::new(&self.job_name, &message.message_id, &message.attributes, body)
            .with_publish_time(message.publish_time)
            .with_delivery_attempt(message.delivery_attempt);

        if self.ack_context.debug {
            info!("Received job {} of {}: {:?}", job.id, self.job_name, job.data);
        }

        let acker = Acknowledger::new(
            Delivery {
                job_name: self.job_name.clone(),
                message_id: message.message_id,
                ack_id: message.ack_id,
                subscription: self.subscription.clone(),
            },
            self.ack_context.clone(),
            lease,
        );

        let handler = self.handler.clone();
        tokio::spawn(async move { handler.handle(job, acker).await });
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.ack_context.events.send(event);
    }
}
