//! Transactional outbox, inbox guard, dispatcher and partitioned consumer.
//!
//! Services write [`OutboxMessage`]s in the same atomic unit as the state
//! change they announce. An [`OutboxDispatcher`] publishes them through a
//! [`MessageTransport`]; on the receiving side a [`PartitionedConsumer`]
//! drives a [`MessageHandler`] that records an inbox row per message so that
//! redeliveries have no effect.

pub mod consumer;
pub mod dead_letter;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod inbox;
pub mod outbox;
pub mod postgres;
pub mod transport;

pub use consumer::{
    ConsumeOutcome, ConsumerConfig, HandleOutcome, HandlerError, MessageHandler,
    PartitionedConsumer, RetryPolicy,
};
pub use dead_letter::{DeadLetter, DeadLetterStore, InMemoryDeadLetterStore};
pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher};
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::{MessagingError, Result};
pub use inbox::{InboxReceipt, InboxRecord, InboxStatus, InboxStore, InboxTable};
pub use outbox::{OutboxMessage, OutboxStore, OutboxTable};
pub use postgres::{PostgresMessaging, insert_outbox_message, try_insert_inbox};
pub use transport::{InMemoryBus, MessageTransport, TransportError};
