//! Order side of the saga.

use common::{IntegrationEvent, OrderId, ProductId, UserId};
use messaging::{InboxReceipt, OutboxMessage};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductCatalog;
use crate::error::{OrderError, Result};
use crate::notifications::{StatusChanged, StatusNotifier};
use crate::order::{Order, OrderItem};
use crate::state::OrderStatus;
use crate::store::{OrderStore, OutcomeApplied};

/// A requested line: which product and how many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Merges lines for the same product, keeping first-seen order.
fn merge_lines(lines: Vec<OrderLine>) -> Result<Vec<OrderLine>> {
    let mut merged: Vec<OrderLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: 0,
            });
        }
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or(
                    OrderError::InvalidQuantity {
                        product_id: line.product_id,
                        quantity: u32::MAX,
                    },
                )?;
            }
            None => merged.push(line),
        }
    }
    Ok(merged)
}

fn record_transition(status: OrderStatus) {
    metrics::counter!("order_status_transitions_total", "status" => status.as_str()).increment(1);
}

/// Creates orders and applies payment outcomes to them.
///
/// Order creation and the `OrderCreated` announcement are one store unit.
/// Payment outcomes arrive through [`PaymentOutcomeHandler`](crate::PaymentOutcomeHandler).
pub struct OrderSagaCoordinator<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    store: S,
    catalog: C,
    notifier: N,
}

impl<S, C, N> OrderSagaCoordinator<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    pub fn new(store: S, catalog: C, notifier: N) -> Self {
        Self {
            store,
            catalog,
            notifier,
        }
    }

    /// Gets a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places an order and requests its payment.
    ///
    /// The order is stored in `PaymentPending` together with its
    /// `OrderCreated` outbox message and returned right away; the payment
    /// outcome arrives later.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create_order(&self, user_id: UserId, lines: Vec<OrderLine>) -> Result<Order> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        let lines = merge_lines(lines)?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let unit_price = self
                .catalog
                .get_price(&line.product_id)
                .await?
                .ok_or_else(|| OrderError::UnknownProduct(line.product_id.clone()))?;
            items.push(OrderItem::new(line.product_id, line.quantity, unit_price));
        }

        let mut order = Order::new(user_id, items)?;
        order.transition_to(OrderStatus::PaymentPending)?;

        let event = IntegrationEvent::order_created(order.id(), user_id, order.total_amount());
        let message = OutboxMessage::for_event(&event)?;
        self.store.insert_with_event(&order, message).await?;

        metrics::counter!("orders_created_total").increment(1);
        record_transition(OrderStatus::PaymentPending);
        tracing::info!(
            order_id = %order.id(),
            %user_id,
            total = %order.total_amount(),
            "order created, payment requested"
        );
        self.notifier
            .notify(StatusChanged::new(order.id(), OrderStatus::PaymentPending));

        Ok(order)
    }

    /// Moves an order to the status a payment outcome implies.
    ///
    /// The receipt is recorded with the status change. Subscribers hear
    /// about real transitions only.
    #[tracing::instrument(skip(self, receipt), fields(message_id = %receipt.message_id))]
    pub async fn apply_payment_outcome(
        &self,
        receipt: &InboxReceipt,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<OutcomeApplied> {
        let applied = self
            .store
            .apply_payment_outcome(receipt, order_id, target)
            .await?;

        match applied {
            OutcomeApplied::Duplicate => {
                tracing::debug!(%order_id, "payment outcome already applied");
            }
            OutcomeApplied::OrderMissing => {
                metrics::counter!("order_payment_anomalies_total").increment(1);
                tracing::warn!(%order_id, status = %target, "payment outcome for unknown order");
            }
            OutcomeApplied::AlreadyTerminal(status) => {
                tracing::info!(%order_id, %status, ignored = %target, "order already terminal");
            }
            OutcomeApplied::Transitioned(transition) => {
                record_transition(transition.current);
                tracing::info!(
                    %order_id,
                    from = %transition.previous,
                    to = %transition.current,
                    "order status changed"
                );
                self.notifier
                    .notify(StatusChanged::new(order_id, transition.current));
            }
        }
        Ok(applied)
    }

    /// Loads an order.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Returns a user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.store.list_by_user(user_id).await
    }
}
