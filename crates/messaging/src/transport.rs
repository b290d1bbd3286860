//! Message transport abstraction and an in-process bus.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::Envelope;

/// Errors reported by a transport when publishing.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport could not be reached. Retrying later may succeed.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// At-least-once publish primitive.
///
/// A successful return means the transport accepted the message. Nothing is
/// promised about ordering across partition keys.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Publishes one message.
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: MessageTransport + ?Sized> MessageTransport for Arc<T> {
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        (**self).publish(envelope).await
    }
}

struct Subscriber {
    message_types: Vec<String>,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Subscriber {
    fn wants(&self, message_type: &str) -> bool {
        self.message_types.iter().any(|t| t == message_type)
    }
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<Subscriber>,
    accepted: usize,
    /// Copies of accepted messages, kept only by recording buses.
    journal: Option<Vec<Envelope>>,
    fail_on_publish: bool,
    duplicate_delivery: bool,
}

/// In-process publish/subscribe bus.
///
/// Each subscription receives a copy of every message of the types it asked
/// for. Fault injection lets tests make publishing fail or deliver every
/// message twice, the two behaviours an at-least-once broker may show.
///
/// A bus built with [`InMemoryBus::new`] holds no copy of what it delivered.
/// [`InMemoryBus::recording`] also keeps every accepted message for
/// inspection, which grows without bound.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that keeps a copy of every accepted message.
    pub fn recording() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                journal: Some(Vec::new()),
                ..BusState::default()
            })),
        }
    }

    /// Subscribes to the given message types.
    pub async fn subscribe(&self, message_types: &[&str]) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(Subscriber {
            message_types: message_types.iter().map(|t| t.to_string()).collect(),
            sender,
        });
        receiver
    }

    /// Makes every publish fail with [`TransportError::Unavailable`] while set.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Delivers every accepted message twice while set.
    pub async fn set_duplicate_delivery(&self, duplicate: bool) {
        self.state.lock().await.duplicate_delivery = duplicate;
    }

    /// Returns every accepted message, in publish order. Empty unless the
    /// bus is [recording](InMemoryBus::recording).
    pub async fn published(&self) -> Vec<Envelope> {
        self.state.lock().await.journal.clone().unwrap_or_default()
    }

    /// Returns the number of accepted messages.
    pub async fn published_count(&self) -> usize {
        self.state.lock().await.accepted
    }
}

#[async_trait]
impl MessageTransport for InMemoryBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        if state.fail_on_publish {
            return Err(TransportError::Unavailable("bus is offline".to_string()));
        }

        let copies = if state.duplicate_delivery { 2 } else { 1 };
        state.subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in state.subscribers.iter().filter(|s| s.wants(&envelope.message_type)) {
            for _ in 0..copies {
                // A receiver dropped since the retain above just misses the message.
                let _ = subscriber.sender.send(envelope.clone());
            }
        }

        state.accepted += 1;
        if let Some(journal) = state.journal.as_mut() {
            journal.push(envelope.clone());
        }
        Ok(())
    }
}
