//! Dead letters: messages moved aside for manual inspection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;
use tokio::sync::Mutex;

use crate::{Envelope, Result};

/// A message a consumer gave up on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: MessageId,
    pub consumer_id: String,
    pub message_type: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Creates a dead letter from the envelope that could not be handled.
    pub fn new(
        envelope: &Envelope,
        consumer_id: impl Into<String>,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            message_id: envelope.message_id,
            consumer_id: consumer_id.into(),
            message_type: envelope.message_type.clone(),
            partition_key: envelope.partition_key.clone(),
            payload: envelope.payload.clone(),
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

/// Storage for dead letters.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Stores a dead letter.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()>;

    /// Returns all dead letters, oldest first.
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

/// In-memory dead-letter store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterStore {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored dead letters.
    pub async fn count(&self) -> usize {
        self.letters.lock().await.len()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        self.letters.lock().await.push(letter);
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.letters.lock().await.clone())
    }
}

#[async_trait]
impl<T: DeadLetterStore + ?Sized> DeadLetterStore for Arc<T> {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        (**self).dead_letter(letter).await
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        (**self).list_dead_letters().await
    }
}
