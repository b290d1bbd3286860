//! Order service error types.

use common::{OrderId, ProductId};
use messaging::MessagingError;
use thiserror::Error;

use crate::state::{OrderStatus, UnknownStatus};

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A line or order total does not fit in a money amount.
    #[error("Order total is too large")]
    AmountOverflow,

    /// The catalog does not know the product.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order already reached `Paid` or `Failed`.
    #[error("Order {order_id} is already {status}")]
    AlreadyTerminal { order_id: OrderId, status: OrderStatus },

    /// The state machine has no such edge.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The store or catalog refused to work; the same call may succeed later.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    /// A status column held an unknown value.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    /// An outbox/inbox error occurred.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderError {
    /// Returns true for errors caused by the request itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::NoItems
                | OrderError::InvalidQuantity { .. }
                | OrderError::AmountOverflow
                | OrderError::UnknownProduct(_)
        )
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OrderError::Unavailable(_) | OrderError::Database(_) => true,
            OrderError::Messaging(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for order results.
pub type Result<T> = std::result::Result<T, OrderError>;
