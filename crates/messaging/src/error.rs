use common::MessageId;
use thiserror::Error;

/// Errors that can occur in the outbox/inbox infrastructure.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The outbox has no message with this id.
    #[error("Outbox message not found: {0}")]
    OutboxMessageNotFound(MessageId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Serialization failures are deterministic; everything touching the
    /// database is treated as transient infrastructure trouble.
    pub fn is_transient(&self) -> bool {
        matches!(self, MessagingError::Database(_))
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
