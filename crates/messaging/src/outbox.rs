//! Transactional outbox.
//!
//! A service never publishes directly. It writes an [`OutboxMessage`] in the
//! same atomic unit as the state change the message announces, and an
//! [`OutboxDispatcher`](crate::OutboxDispatcher) publishes it later. The
//! message therefore exists if and only if the change was committed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IntegrationEvent, MessageId};
use tokio::sync::Notify;

use crate::{Envelope, MessagingError, Result};

/// A message waiting in (or already drained from) the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    /// Message id; becomes the envelope's message id on publish.
    pub id: MessageId,

    /// The type of the message (e.g., "PaymentCompleted").
    pub message_type: String,

    /// The aggregate that produced the message. Publish order is preserved per value.
    pub aggregate_id: String,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// When the message was written, together with its domain change.
    pub created_at: DateTime<Utc>,

    /// When the dispatcher confirmed publication. Set exactly once.
    pub sent_at: Option<DateTime<Utc>>,

    /// Number of failed publish attempts.
    pub attempts: u32,

    /// Error reported by the most recent failed attempt.
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// Builds an unsent outbox message for an integration event.
    pub fn for_event(event: &IntegrationEvent) -> Result<Self> {
        Ok(Self {
            id: MessageId::new(),
            message_type: event.message_type().to_string(),
            aggregate_id: event.order_id().to_string(),
            payload: serde_json::to_value(event)?,
            created_at: Utc::now(),
            sent_at: None,
            attempts: 0,
            last_error: None,
        })
    }

    /// Returns true once the dispatcher has marked the message sent.
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Converts the message into the envelope that goes on the wire.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            message_id: self.id,
            message_type: self.message_type.clone(),
            partition_key: self.aggregate_id.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
        }
    }
}

/// Dispatcher-side access to a service's outbox.
///
/// Writing happens through each service's own store, inside the unit of work
/// that also applies the domain change; this trait only drains.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` unsent messages in creation order.
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Marks a message as sent if it is not already.
    ///
    /// Returns false when `sent_at` was already set, e.g. by a concurrent
    /// dispatcher that published the same message.
    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> Result<bool>;

    /// Records a failed publish attempt. The message stays unsent.
    async fn record_failure(&self, id: MessageId, error: &str) -> Result<()>;

    /// Returns all outbox messages, sent or not, in creation order.
    async fn list_outbox(&self) -> Result<Vec<OutboxMessage>>;

    /// Signal fired after a commit that wrote outbox messages.
    ///
    /// Stores without a change trigger return None and are polled.
    fn wake_signal(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// In-memory outbox table.
///
/// Not synchronized on its own: service stores embed it in the state they
/// guard with a single lock, so that outbox rows and domain rows change in
/// the same critical section.
#[derive(Debug, Clone, Default)]
pub struct OutboxTable {
    messages: Vec<OutboxMessage>,
    index: HashMap<MessageId, usize>,
}

impl OutboxTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn push(&mut self, message: OutboxMessage) {
        self.index.insert(message.id, self.messages.len());
        self.messages.push(message);
    }

    /// Returns up to `limit` unsent messages in creation order.
    pub fn unsent(&self, limit: usize) -> Vec<OutboxMessage> {
        self.messages
            .iter()
            .filter(|m| !m.is_sent())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sets `sent_at` if unset. Returns false if it was already set.
    pub fn mark_sent(&mut self, id: MessageId, sent_at: DateTime<Utc>) -> Result<bool> {
        let message = self.get_mut(id)?;
        if message.sent_at.is_some() {
            return Ok(false);
        }
        message.sent_at = Some(sent_at);
        Ok(true)
    }

    /// Bumps the attempt counter and stores the error.
    pub fn record_failure(&mut self, id: MessageId, error: &str) -> Result<()> {
        let message = self.get_mut(id)?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        Ok(())
    }

    /// Looks up a message by id.
    pub fn get(&self, id: MessageId) -> Option<&OutboxMessage> {
        self.index.get(&id).map(|&i| &self.messages[i])
    }

    /// Returns all messages in creation order.
    pub fn all(&self) -> &[OutboxMessage] {
        &self.messages
    }

    /// Number of messages, sent or not.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the table holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn get_mut(&mut self, id: MessageId) -> Result<&mut OutboxMessage> {
        let i = *self
            .index
            .get(&id)
            .ok_or(MessagingError::OutboxMessageNotFound(id))?;
        Ok(&mut self.messages[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;

    fn message() -> OutboxMessage {
        OutboxMessage::for_event(&IntegrationEvent::payment_completed(OrderId::new())).unwrap()
    }

    #[test]
    fn unsent_preserves_creation_order() {
        let mut table = OutboxTable::new();
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let m = message();
                let id = m.id;
                table.push(m);
                id
            })
            .collect();

        let unsent: Vec<_> = table.unsent(10).into_iter().map(|m| m.id).collect();
        assert_eq!(unsent, ids);
        assert_eq!(table.unsent(2).len(), 2);
    }

    #[test]
    fn mark_sent_is_compare_and_set() {
        let mut table = OutboxTable::new();
        let m = message();
        let id = m.id;
        table.push(m);

        assert!(table.mark_sent(id, Utc::now()).unwrap());
        let first = table.get(id).unwrap().sent_at;
        assert!(!table.mark_sent(id, Utc::now()).unwrap());
        assert_eq!(table.get(id).unwrap().sent_at, first);
        assert!(table.unsent(10).is_empty());
    }

    #[test]
    fn record_failure_keeps_message_unsent() {
        let mut table = OutboxTable::new();
        let m = message();
        let id = m.id;
        table.push(m);

        table.record_failure(id, "broker down").unwrap();
        table.record_failure(id, "still down").unwrap();

        let stored = table.get(id).unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("still down"));
        assert!(!stored.is_sent());
        assert_eq!(table.unsent(10).len(), 1);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let mut table = OutboxTable::new();
        assert!(matches!(
            table.mark_sent(MessageId::new(), Utc::now()),
            Err(MessagingError::OutboxMessageNotFound(_))
        ));
    }

    #[test]
    fn envelope_reuses_message_id_and_aggregate_key() {
        let m = message();
        let envelope = m.to_envelope();
        assert_eq!(envelope.message_id, m.id);
        assert_eq!(envelope.partition_key, m.aggregate_id);
        assert_eq!(envelope.message_type, "PaymentCompleted");
    }
}
