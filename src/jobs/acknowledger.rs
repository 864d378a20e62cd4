//! Per-message settlement and in-flight accounting.
//!
//! Every pull batch admitted by the worker holds one [`BatchLease`]. Each
//! message of the batch gets an [`Acknowledger`] sharing that lease; the
//! slot goes back to the window when the last message of the batch is
//! settled, or when its acknowledger is dropped unsettled.
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use log::{debug, info, warn};
use tokio::sync::broadcast;

use super::{with_retry, RetryError, RetryPolicy, WorkerError, WorkerEvent};
use crate::services::{PubSubClientTrait, PubSubError, SubscriptionHandle};

/// One slot of a subscription's in-flight window.
#[derive(Debug)]
pub struct BatchLease {
    inflight: Arc<AtomicUsize>,
}

impl BatchLease {
    /// Takes a slot if fewer than `max_in_progress` are held.
    pub fn acquire(inflight: Arc<AtomicUsize>, max_in_progress: usize) -> Option<Self> {
        inflight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max_in_progress).then_some(current + 1)
            })
            .ok()
            .map(|_| Self { inflight })
    }
}

impl Drop for BatchLease {
    fn drop(&mut self) {
        // Saturates at zero.
        let _ = self
            .inflight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
    }
}

/// Broker coordinates of a delivered message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_name: String,
    pub message_id: String,
    pub ack_id: String,
    pub subscription: SubscriptionHandle,
}

/// Settings shared by all acknowledgers of one poll loop.
#[derive(Clone)]
pub struct AckContext {
    pub client: Arc<dyn PubSubClientTrait>,
    pub retry_policy: RetryPolicy,
    pub nack_deadline_seconds: u32,
    pub events: broadcast::Sender<WorkerEvent>,
    pub debug: bool,
}

struct AcknowledgerInner {
    delivery: Delivery,
    context: AckContext,
    settled: AtomicBool,
    lease: Mutex<Option<Arc<BatchLease>>>,
}

/// Handle given to job handlers to settle a message.
///
/// `ack` and `nack` share a single-fire guard: only the first call of
/// either reaches the broker, later calls return `Ok(())` immediately.
#[derive(Clone)]
pub struct Acknowledger {
    inner: Arc<AcknowledgerInner>,
}

impl std::fmt::Debug for Acknowledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acknowledger")
            .field("delivery", &self.inner.delivery)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Acknowledger {
    pub fn new(delivery: Delivery, context: AckContext, lease: Arc<BatchLease>) -> Self {
        Self {
            inner: Arc::new(AcknowledgerInner {
                delivery,
                context,
                settled: AtomicBool::new(false),
                lease: Mutex::new(Some(lease)),
            }),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.inner.delivery.message_id
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::SeqCst)
    }

    /// Acknowledges the message so the broker never redelivers it.
    pub async fn ack(&self) -> Result<(), WorkerError> {
        if !self.claim("ack") {
            return Ok(());
        }

        let delivery = &self.inner.delivery;
        let context = &self.inner.context;
        if context.debug {
            info!(
                "The job {} of {} is finished, acknowledging",
                delivery.message_id, delivery.job_name
            );
        }

        let result = with_retry("acknowledge", &context.retry_policy, || {
            context
                .client
                .acknowledge(&delivery.subscription, vec![delivery.ack_id.clone()])
        })
        .await;
        self.release_lease();

        match result {
            Ok(()) => {
                self.emit(WorkerEvent::Acked {
                    job_name: delivery.job_name.clone(),
                    message_id: delivery.message_id.clone(),
                });
                Ok(())
            }
            Err(e) => {
                let error = WorkerError::AckFailure {
                    job_name: delivery.job_name.clone(),
                    message_id: delivery.message_id.clone(),
                    attempts: e.attempts(),
                    last_error: e.into_last_error(),
                };
                self.emit(WorkerEvent::Failed(error.clone()));
                Err(error)
            }
        }
    }

    /// Asks the broker to redeliver the message once the nack deadline passes.
    pub async fn nack(&self) -> Result<(), WorkerError> {
        if !self.claim("nack") {
            return Ok(());
        }

        let delivery = &self.inner.delivery;
        let context = &self.inner.context;
        if context.debug {
            info!(
                "The job {} of {} failed, requesting redelivery in {}s",
                delivery.message_id, delivery.job_name, context.nack_deadline_seconds
            );
        }

        let result: Result<(), RetryError<PubSubError>> =
            with_retry("modify ack deadline", &context.retry_policy, || {
                context.client.modify_ack_deadline(
                    &delivery.subscription,
                    vec![delivery.ack_id.clone()],
                    context.nack_deadline_seconds,
                )
            })
            .await;
        self.release_lease();

        match result {
            Ok(()) => {
                self.emit(WorkerEvent::Nacked {
                    job_name: delivery.job_name.clone(),
                    message_id: delivery.message_id.clone(),
                });
                Ok(())
            }
            Err(e) => {
                let error = WorkerError::NackFailure {
                    job_name: delivery.job_name.clone(),
                    message_id: delivery.message_id.clone(),
                    attempts: e.attempts(),
                    last_error: e.into_last_error(),
                };
                self.emit(WorkerEvent::Failed(error.clone()));
                Err(error)
            }
        }
    }

    fn claim(&self, action: &str) -> bool {
        let first = !self.inner.settled.swap(true, Ordering::SeqCst);
        if !first {
            debug!(
                "Ignoring {} of message {}: already settled",
                action, self.inner.delivery.message_id
            );
        }
        first
    }

    fn release_lease(&self) {
        match self.inner.lease.lock() {
            Ok(mut lease) => drop(lease.take()),
            Err(e) => warn!("Lease lock poisoned: {}", e),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.inner.context.events.send(event);
    }
}
