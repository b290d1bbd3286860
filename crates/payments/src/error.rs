//! Payment service error types.

use common::UserId;
use messaging::MessagingError;
use thiserror::Error;

/// Errors returned by the ledger and payment processor.
///
/// Insufficient funds is deliberately absent: a rejected withdrawal is a
/// normal [`WithdrawOutcome`](crate::WithdrawOutcome), not an error.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The request itself is invalid (negative amount, duplicate account).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No account exists for the user.
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    /// The store refused to work; the same call may succeed later.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

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

impl LedgerError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) | LedgerError::Database(_) => true,
            LedgerError::Messaging(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;
