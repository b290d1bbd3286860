//! Order store trait.

use async_trait::async_trait;
use common::{OrderId, UserId};
use messaging::{DeadLetterStore, InboxReceipt, InboxStore, OutboxMessage, OutboxStore};

use crate::error::Result;
use crate::order::{Order, StatusTransition};
use crate::state::OrderStatus;

/// What [`OrderStore::apply_payment_outcome`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeApplied {
    /// The inbox already held the message; nothing changed.
    Duplicate,
    /// No such order. The inbox row was recorded anyway.
    OrderMissing,
    /// The order was already terminal and kept its status.
    AlreadyTerminal(OrderStatus),
    /// The status was written.
    Transitioned(StatusTransition),
}

/// Persistence for orders and the order service's outbox and inbox.
///
/// Each method is one atomic unit.
#[async_trait]
pub trait OrderStore: OutboxStore + InboxStore + DeadLetterStore {
    /// Stores a new order together with the message announcing it.
    async fn insert_with_event(&self, order: &Order, message: OutboxMessage) -> Result<()>;

    /// Records the inbox receipt and moves the order to `target`.
    ///
    /// The transition is decided by [`Order::transition_to`]. A missing or
    /// terminal order still gets the receipt recorded and nothing else; an
    /// edge the state machine lacks is an error and records nothing.
    async fn apply_payment_outcome(
        &self,
        receipt: &InboxReceipt,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<OutcomeApplied>;

    /// Loads an order.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns a user's orders, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;
}
