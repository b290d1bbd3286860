//! In-memory order store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId, UserId};
use messaging::{
    DeadLetter, DeadLetterStore, InboxReceipt, InboxStatus, InboxStore, InboxTable, OutboxMessage,
    OutboxStore, OutboxTable,
};
use tokio::sync::{Mutex, Notify};

use crate::error::{OrderError, Result};
use crate::order::Order;
use crate::state::OrderStatus;
use crate::store::{OrderStore, OutcomeApplied};

#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    outbox: OutboxTable,
    inbox: InboxTable,
    dead_letters: Vec<DeadLetter>,
    unavailable: bool,
}

impl OrderState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(OrderError::Unavailable("order store offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory order store.
///
/// One mutex guards orders, outbox and inbox together, which makes each
/// trait method a single atomic unit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<OrderState>>,
    committed: Arc<Notify>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every order operation fail with [`OrderError::Unavailable`]
    /// while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_with_event(&self, order: &Order, message: OutboxMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        state.orders.insert(order.id(), order.clone());
        state.outbox.push(message);
        drop(state);
        self.committed.notify_one();
        Ok(())
    }

    async fn apply_payment_outcome(
        &self,
        receipt: &InboxReceipt,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<OutcomeApplied> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if state.inbox.contains(receipt) {
            return Ok(OutcomeApplied::Duplicate);
        }

        let applied = match state.orders.get_mut(&order_id) {
            None => OutcomeApplied::OrderMissing,
            Some(order) => match order.transition_to(target) {
                Ok(transition) => OutcomeApplied::Transitioned(transition),
                Err(OrderError::AlreadyTerminal { status, .. }) => {
                    OutcomeApplied::AlreadyTerminal(status)
                }
                Err(e) => return Err(e),
            },
        };
        state.inbox.try_insert(receipt, Utc::now());
        Ok(applied)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        state.check_available()?;

        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(orders)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn fetch_unsent(&self, limit: usize) -> messaging::Result<Vec<OutboxMessage>> {
        Ok(self.state.lock().await.outbox.unsent(limit))
    }

    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> messaging::Result<bool> {
        self.state.lock().await.outbox.mark_sent(id, sent_at)
    }

    async fn record_failure(&self, id: MessageId, error: &str) -> messaging::Result<()> {
        self.state.lock().await.outbox.record_failure(id, error)
    }

    async fn list_outbox(&self) -> messaging::Result<Vec<OutboxMessage>> {
        Ok(self.state.lock().await.outbox.all().to_vec())
    }

    fn wake_signal(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.committed))
    }
}

#[async_trait]
impl InboxStore for InMemoryOrderStore {
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> messaging::Result<InboxStatus> {
        Ok(self.state.lock().await.inbox.try_insert(receipt, Utc::now()))
    }

    async fn is_processed(&self, receipt: &InboxReceipt) -> messaging::Result<bool> {
        Ok(self.state.lock().await.inbox.contains(receipt))
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryOrderStore {
    async fn dead_letter(&self, letter: DeadLetter) -> messaging::Result<()> {
        self.state.lock().await.dead_letters.push(letter);
        Ok(())
    }

    async fn list_dead_letters(&self) -> messaging::Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead_letters.clone())
    }
}
