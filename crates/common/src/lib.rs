//! Shared types for the order/payment saga.
//!
//! Both services depend on this crate and nothing else of each other:
//! identifiers, the `Money` value object and the integration-event contracts.

pub mod events;
pub mod money;
pub mod types;

pub use events::{
    IntegrationEvent, ORDER_CREATED, OrderCreatedData, PAYMENT_COMPLETED, PAYMENT_FAILED,
    PaymentCompletedData, PaymentFailedData,
};
pub use money::Money;
pub use types::{MessageId, OrderId, ProductId, TransactionId, UserId};
