use chrono::{DateTime, Utc};
use common::{IntegrationEvent, MessageId};
use serde::{Serialize, de::DeserializeOwned};

/// A message as it travels over the transport.
///
/// The envelope carries the identity used for idempotent consumption and the
/// key used for ordered delivery; the payload is opaque JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Unique identifier of this message; the inbox key on the consumer side.
    pub message_id: MessageId,

    /// The type of the message (e.g., "OrderCreated").
    pub message_type: String,

    /// Key of the aggregate the message belongs to.
    ///
    /// Messages with the same key are published and consumed in order.
    pub partition_key: String,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// When the message was created at its source.
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Wraps an integration event in a fresh envelope keyed by its order.
    pub fn for_event(event: &IntegrationEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::builder()
            .message_type(event.message_type())
            .partition_key(event.order_id().to_string())
            .payload(event)?
            .build())
    }

    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    message_id: Option<MessageId>,
    message_type: Option<String>,
    partition_key: Option<String>,
    payload: Option<serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the message type.
    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Sets the partition key.
    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the envelope.
    ///
    /// # Panics
    ///
    /// Panics if message_type, partition_key or payload are not set.
    pub fn build(self) -> Envelope {
        Envelope {
            message_id: self.message_id.unwrap_or_default(),
            message_type: self.message_type.expect("message_type is required"),
            partition_key: self.partition_key.expect("partition_key is required"),
            payload: self.payload.expect("payload is required"),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }

    /// Tries to build the envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<Envelope> {
        Some(Envelope {
            message_id: self.message_id.unwrap_or_default(),
            message_type: self.message_type?,
            partition_key: self.partition_key?,
            payload: self.payload?,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, OrderId, UserId};

    #[test]
    fn for_event_keys_by_order() {
        let order_id = OrderId::new();
        let event = IntegrationEvent::order_created(order_id, UserId::new(), Money::from_cents(900));

        let envelope = Envelope::for_event(&event).unwrap();

        assert_eq!(envelope.message_type, "OrderCreated");
        assert_eq!(envelope.partition_key, order_id.to_string());
        assert_eq!(envelope.decode::<IntegrationEvent>().unwrap(), event);
    }

    #[test]
    fn each_envelope_gets_its_own_message_id() {
        let event = IntegrationEvent::payment_completed(OrderId::new());
        let a = Envelope::for_event(&event).unwrap();
        let b = Envelope::for_event(&event).unwrap();
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn try_build_returns_none_on_missing_fields() {
        assert!(Envelope::builder().message_type("X").try_build().is_none());
    }

    #[test]
    fn decode_rejects_foreign_payloads() {
        let envelope = Envelope::builder()
            .message_type("OrderCreated")
            .partition_key("k")
            .payload_raw(serde_json::json!({"unexpected": true}))
            .build();
        assert!(envelope.decode::<IntegrationEvent>().is_err());
    }
}
