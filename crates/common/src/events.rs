//! Integration events exchanged between the order and payment services.
//!
//! These are the only messages that cross the service boundary. Each one is
//! carried inside a transport envelope that supplies the message id used for
//! idempotent consumption; the payload here holds business data only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, OrderId, UserId};

/// Message type name of [`IntegrationEvent::OrderCreated`].
pub const ORDER_CREATED: &str = "OrderCreated";
/// Message type name of [`IntegrationEvent::PaymentCompleted`].
pub const PAYMENT_COMPLETED: &str = "PaymentCompleted";
/// Message type name of [`IntegrationEvent::PaymentFailed`].
pub const PAYMENT_FAILED: &str = "PaymentFailed";

/// Events published by one service and consumed by the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntegrationEvent {
    /// An order was placed and awaits payment.
    OrderCreated(OrderCreatedData),

    /// The order total was withdrawn from the user's account.
    PaymentCompleted(PaymentCompletedData),

    /// The withdrawal was rejected.
    PaymentFailed(PaymentFailedData),
}

impl IntegrationEvent {
    /// Returns the message type name used for routing.
    pub fn message_type(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderCreated(_) => ORDER_CREATED,
            IntegrationEvent::PaymentCompleted(_) => PAYMENT_COMPLETED,
            IntegrationEvent::PaymentFailed(_) => PAYMENT_FAILED,
        }
    }

    /// Returns the order this event belongs to.
    ///
    /// Every event in the workflow is keyed by its order, which is also the
    /// partition key for ordered delivery.
    pub fn order_id(&self) -> OrderId {
        match self {
            IntegrationEvent::OrderCreated(data) => data.order_id,
            IntegrationEvent::PaymentCompleted(data) => data.order_id,
            IntegrationEvent::PaymentFailed(data) => data.order_id,
        }
    }

    /// Creates an OrderCreated event stamped with the current time.
    pub fn order_created(order_id: OrderId, user_id: UserId, total_amount: Money) -> Self {
        IntegrationEvent::OrderCreated(OrderCreatedData {
            order_id,
            user_id,
            total_amount,
            timestamp: Utc::now(),
        })
    }

    /// Creates a PaymentCompleted event.
    pub fn payment_completed(order_id: OrderId) -> Self {
        IntegrationEvent::PaymentCompleted(PaymentCompletedData { order_id })
    }

    /// Creates a PaymentFailed event.
    pub fn payment_failed(order_id: OrderId, reason: impl Into<String>) -> Self {
        IntegrationEvent::PaymentFailed(PaymentFailedData {
            order_id,
            reason: Some(reason.into()),
        })
    }
}

/// Data for OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub timestamp: DateTime<Utc>,
}

/// Data for PaymentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompletedData {
    pub order_id: OrderId,
}

/// Data for PaymentFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub order_id: OrderId,

    /// Why the withdrawal was rejected. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
