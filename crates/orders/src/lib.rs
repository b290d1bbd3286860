//! Order service: the order aggregate, the order side of the saga and status
//! notifications.

pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod memory;
pub mod notifications;
pub mod order;
pub mod postgres;
pub mod state;
pub mod store;

pub use catalog::{InMemoryProductCatalog, ProductCatalog};
pub use coordinator::{OrderLine, OrderSagaCoordinator};
pub use error::{OrderError, Result};
pub use handler::{CONSUMER_ID, PaymentOutcomeHandler};
pub use memory::InMemoryOrderStore;
pub use notifications::{
    NoopNotifier, StatusChanged, StatusNotifier, Subscription, SubscriptionRegistry,
};
pub use order::{Order, OrderItem, StatusTransition};
pub use postgres::PostgresOrderStore;
pub use state::{OrderStatus, UnknownStatus};
pub use store::{OrderStore, OutcomeApplied};
