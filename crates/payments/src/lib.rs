//! Payment service: ledger, payment processor and the `OrderCreated` reactor.

pub mod account;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod reactor;
pub mod store;

pub use account::{Account, Transaction, TransactionKind, WithdrawFailure, WithdrawOutcome};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use processor::PaymentProcessor;
pub use reactor::{CONSUMER_ID, PaymentSagaReactor};
pub use store::{LedgerStore, Settlement};
