//! Status notification fan-out.
//!
//! Best effort: a notification goes to whoever is subscribed to the order at
//! that moment. Nothing is replayed to late subscribers, and a subscriber that
//! cannot keep up is dropped instead of slowing the saga down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::OrderStatus;

/// Pushed to subscribers when an order's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

impl StatusChanged {
    pub fn new(order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            changed_at: Utc::now(),
        }
    }
}

/// Sink for status changes.
pub trait StatusNotifier: Send + Sync {
    /// Delivers a change without blocking.
    fn notify(&self, change: StatusChanged);
}

impl<N: StatusNotifier + ?Sized> StatusNotifier for Arc<N> {
    fn notify(&self, change: StatusChanged) {
        (**self).notify(change)
    }
}

/// Notifier that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl StatusNotifier for NoopNotifier {
    fn notify(&self, _change: StatusChanged) {}
}

type Subscribers = HashMap<OrderId, Vec<(u64, mpsc::Sender<StatusChanged>)>>;

#[derive(Debug)]
struct RegistryInner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    capacity: usize,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, order_id: OrderId, id: u64) {
        let mut subscribers = self.lock();
        if let Some(list) = subscribers.get_mut(&order_id) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                subscribers.remove(&order_id);
            }
        }
    }
}

/// Registry of per-order subscribers.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}

impl SubscriptionRegistry {
    /// Creates a registry whose subscribers buffer up to `capacity` changes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribes to status changes of one order.
    pub fn subscribe(&self, order_id: OrderId) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        self.inner
            .lock()
            .entry(order_id)
            .or_default()
            .push((id, sender));

        Subscription {
            order_id,
            id,
            receiver,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of live subscribers for an order.
    pub fn subscriber_count(&self, order_id: OrderId) -> usize {
        self.inner.lock().get(&order_id).map_or(0, Vec::len)
    }
}

impl StatusNotifier for SubscriptionRegistry {
    fn notify(&self, change: StatusChanged) {
        let mut subscribers = self.inner.lock();
        let Some(list) = subscribers.get_mut(&change.order_id) else {
            return;
        };

        list.retain(|(id, sender)| match sender.try_send(change.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(order_id = %change.order_id, subscriber = *id, "dropping slow subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            subscribers.remove(&change.order_id);
        }
    }
}

/// A live subscription. Unsubscribes when dropped.
#[derive(Debug)]
pub struct Subscription {
    order_id: OrderId,
    id: u64,
    receiver: mpsc::Receiver<StatusChanged>,
    registry: Arc<RegistryInner>,
}

impl Subscription {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Waits for the next change. Returns None once the registry dropped
    /// this subscriber.
    pub async fn recv(&mut self) -> Option<StatusChanged> {
        self.receiver.recv().await
    }

    /// Returns a buffered change without waiting.
    pub fn try_recv(&mut self) -> Option<StatusChanged> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.order_id, self.id);
    }
}
