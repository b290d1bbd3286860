//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};
use crate::state::OrderStatus;

/// An item in an order. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit, fixed when the order was placed.
    pub unit_price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Result<Money> {
        self.unit_price
            .checked_mul(self.quantity)
            .ok_or(OrderError::AmountOverflow)
    }
}

/// A status change, computed before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub previous: OrderStatus,
    pub current: OrderStatus,
}

/// Order aggregate root.
///
/// `status` is the only field that changes after construction, and only
/// through [`Order::transition_to`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total_amount: Money,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an order in `Created` from already-priced items.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }

        let line_totals = items
            .iter()
            .map(OrderItem::total_price)
            .collect::<Result<Vec<_>>>()?;
        let total_amount = Money::checked_sum(line_totals).ok_or(OrderError::AmountOverflow)?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            total_amount,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from stored fields.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        total_amount: Money,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            items,
            total_amount,
            status,
            created_at,
            updated_at,
        }
    }

    /// Moves the order to `target`.
    ///
    /// Terminal orders refuse with [`OrderError::AlreadyTerminal`] and stay
    /// unchanged; so does an order asked to take an edge the state machine
    /// does not have.
    pub fn transition_to(&mut self, target: OrderStatus) -> Result<StatusTransition> {
        if self.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let transition = StatusTransition {
            previous: self.status,
            current: target,
        };
        self.status = target;
        self.updated_at = Utc::now();
        Ok(transition)
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new(
            UserId::new(),
            vec![
                OrderItem::new("SKU-001", 2, Money::from_cents(1000)),
                OrderItem::new("SKU-002", 1, Money::from_cents(550)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_order_is_created_with_total() {
        let order = order();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_amount(), Money::from_cents(2550));
        assert_eq!(order.items().len(), 2);
    }

    #[test]
    fn test_empty_order_is_rejected() {
        assert!(matches!(
            Order::new(UserId::new(), vec![]),
            Err(OrderError::NoItems)
        ));
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let result = Order::new(
            UserId::new(),
            vec![OrderItem::new("SKU-001", 0, Money::from_cents(1000))],
        );
        assert!(matches!(result, Err(OrderError::InvalidQuantity { quantity: 0, .. })));
    }

    #[test]
    fn test_transition_reports_previous_status() {
        let mut order = order();
        let t = order.transition_to(OrderStatus::PaymentPending).unwrap();
        assert_eq!(t.previous, OrderStatus::Created);
        assert_eq!(t.current, OrderStatus::PaymentPending);

        let t = order.transition_to(OrderStatus::Paid).unwrap();
        assert_eq!(t.previous, OrderStatus::PaymentPending);
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn test_terminal_status_is_never_overwritten() {
        let mut order = order();
        order.transition_to(OrderStatus::PaymentPending).unwrap();
        order.transition_to(OrderStatus::Failed).unwrap();
        let updated_at = order.updated_at();

        let result = order.transition_to(OrderStatus::Paid);
        assert!(matches!(
            result,
            Err(OrderError::AlreadyTerminal {
                status: OrderStatus::Failed,
                ..
            })
        ));
        assert_eq!(order.status(), OrderStatus::Failed);
        assert_eq!(order.updated_at(), updated_at);
    }

    #[test]
    fn test_payment_outcome_accepted_straight_from_created() {
        let mut order = order();
        let t = order.transition_to(OrderStatus::Paid).unwrap();
        assert_eq!(t.previous, OrderStatus::Created);
    }

    #[test]
    fn test_invalid_edge_is_rejected() {
        let mut order = order();
        order.transition_to(OrderStatus::PaymentPending).unwrap();
        assert!(matches!(
            order.transition_to(OrderStatus::Created),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert_eq!(order.status(), OrderStatus::PaymentPending);
    }

    #[test]
    fn test_order_item_total_price() {
        let item = OrderItem::new("SKU-001", 3, Money::from_cents(1000));
        assert_eq!(item.total_price().unwrap().cents(), 3000);
    }

    #[test]
    fn test_overflowing_totals_are_rejected() {
        let line = OrderItem::new("SKU-001", u32::MAX, Money::from_cents(i64::MAX / 2));
        assert!(matches!(line.total_price(), Err(OrderError::AmountOverflow)));
        assert!(matches!(
            Order::new(UserId::new(), vec![line]),
            Err(OrderError::AmountOverflow)
        ));

        let result = Order::new(
            UserId::new(),
            vec![
                OrderItem::new("SKU-001", 1, Money::from_cents(i64::MAX)),
                OrderItem::new("SKU-002", 1, Money::from_cents(1)),
            ],
        );
        let err = result.unwrap_err();
        assert!(matches!(err, OrderError::AmountOverflow));
        assert!(err.is_validation());
    }
}
