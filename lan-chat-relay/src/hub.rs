use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    envelope::{Envelope, SessionId},
    error::DeliveryError,
};

/// Anything the hub can hand envelopes to.
///
/// Implementations serialize their own deliveries; the hub may call
/// `deliver` on the same subscriber from several publishing tasks at once.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SessionId;
    fn username(&self) -> &str;
    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Registry of live sessions and the fan-out point for every envelope.
pub struct Hub {
    subscribers: Mutex<HashMap<SessionId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
}

/// What happened to one published envelope.
#[derive(Debug, Default)]
pub struct Delivery {
    pub recipients: usize,
    pub failures: Vec<DeliveryFailure>,
}

#[derive(Debug)]
pub struct DeliveryFailure {
    pub id: SessionId,
    pub username: String,
    pub error: DeliveryError,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(subscriber.id(), subscriber);
    }

    /// Returns `false` if the id was not registered.
    pub async fn unsubscribe(&self, id: SessionId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.remove(&id).is_some()
    }

    pub async fn usernames(&self) -> Vec<String> {
        let subscribers = self.subscribers.lock().await;
        subscribers
            .values()
            .map(|subscriber| subscriber.username().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delivers `envelope` to every subscriber its target selects.
    ///
    /// The registry lock is released before any delivery starts, so a slow
    /// receiver delays this publisher but never blocks joins or leaves.
    pub async fn publish(&self, envelope: &Envelope) -> Delivery {
        let recipients: Vec<Arc<dyn Subscriber>> = {
            let subscribers = self.subscribers.lock().await;
            subscribers
                .values()
                .filter(|subscriber| envelope.target.matches(subscriber.username()))
                .cloned()
                .collect()
        };

        let mut delivery = Delivery {
            recipients: recipients.len(),
            failures: Vec::new(),
        };

        for recipient in recipients {
            if let Err(error) = recipient.deliver(envelope).await {
                warn!(
                    session = recipient.id(),
                    user = recipient.username(),
                    kind = envelope.kind(),
                    %error,
                    "delivery failed"
                );
                delivery.failures.push(DeliveryFailure {
                    id: recipient.id(),
                    username: recipient.username().to_string(),
                    error,
                });
            }
        }

        debug!(
            kind = envelope.kind(),
            from = %envelope.origin.username,
            recipients = delivery.recipients,
            "published"
        );
        delivery
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
