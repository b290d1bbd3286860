//! Inbox guard for idempotent consumption.
//!
//! Delivery is at-least-once. A consumer records every `(message_id,
//! consumer_id)` pair it has processed; a second delivery finds the record
//! and is acknowledged without side effects.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;

use crate::{Envelope, Result};

/// Proof that a consumer has processed a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxRecord {
    pub message_id: MessageId,
    pub consumer_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Key of an inbox record: which consumer is processing which message.
///
/// Passed into store operations that must record the inbox row in the same
/// atomic unit as their domain change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InboxReceipt {
    pub message_id: MessageId,
    pub consumer_id: String,
}

impl InboxReceipt {
    /// Creates a receipt for a message and consumer.
    pub fn new(message_id: MessageId, consumer_id: impl Into<String>) -> Self {
        Self {
            message_id,
            consumer_id: consumer_id.into(),
        }
    }

    /// Creates a receipt for an envelope being handled by `consumer_id`.
    pub fn for_envelope(envelope: &Envelope, consumer_id: impl Into<String>) -> Self {
        Self::new(envelope.message_id, consumer_id)
    }
}

/// Result of the inbox check-and-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    /// First delivery; the record was inserted and the handler must run.
    New,
    /// A record already existed; skip the handler.
    AlreadyProcessed,
}

impl InboxStatus {
    /// Returns true for a redelivered message.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, InboxStatus::AlreadyProcessed)
    }
}

/// Standalone inbox access.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Atomically checks for and inserts the inbox record.
    ///
    /// This is the record-then-act form: a crash after this call and before
    /// the handler's own commit loses the handler's effect. Handlers that
    /// mutate state record the receipt inside their own unit of work instead.
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> Result<InboxStatus>;

    /// Returns true if the pair has been recorded.
    async fn is_processed(&self, receipt: &InboxReceipt) -> Result<bool>;
}

/// In-memory inbox table, embedded in a service store's locked state.
#[derive(Debug, Clone, Default)]
pub struct InboxTable {
    records: HashMap<InboxReceipt, DateTime<Utc>>,
}

impl InboxTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the record unless it exists.
    pub fn try_insert(&mut self, receipt: &InboxReceipt, processed_at: DateTime<Utc>) -> InboxStatus {
        if self.records.contains_key(receipt) {
            return InboxStatus::AlreadyProcessed;
        }
        self.records.insert(receipt.clone(), processed_at);
        InboxStatus::New
    }

    /// Returns true if the pair has been recorded.
    pub fn contains(&self, receipt: &InboxReceipt) -> bool {
        self.records.contains_key(receipt)
    }

    /// Returns the stored record for a pair.
    pub fn get(&self, receipt: &InboxReceipt) -> Option<InboxRecord> {
        self.records.get(receipt).map(|&processed_at| InboxRecord {
            message_id: receipt.message_id,
            consumer_id: receipt.consumer_id.clone(),
            processed_at,
        })
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
