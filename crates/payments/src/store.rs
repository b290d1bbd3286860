//! Ledger store trait.

use async_trait::async_trait;
use common::{Money, OrderCreatedData, UserId};
use messaging::{DeadLetterStore, InboxReceipt, InboxStore, OutboxStore};

use crate::account::{Account, WithdrawFailure, WithdrawOutcome};
use crate::error::Result;

/// What [`LedgerStore::settle_order_payment`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The inbox already held the message; nothing changed.
    Duplicate,
    /// The withdrawal was applied and `PaymentCompleted` was written.
    Completed,
    /// The withdrawal was rejected and `PaymentFailed` was written.
    Failed(WithdrawFailure),
}

/// Persistence for accounts and the payment service's outbox and inbox.
///
/// Each method is one atomic unit. Operations on the same account are
/// serialized; a withdrawal either fully applies or leaves no trace.
#[async_trait]
pub trait LedgerStore: OutboxStore + InboxStore + DeadLetterStore {
    /// Stores a new account. Fails if the user already has one.
    async fn create_account(&self, account: Account) -> Result<Account>;

    /// Credits an account and returns it afterwards.
    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Account>;

    /// Debits an account.
    async fn withdraw(&self, user_id: UserId, amount: Money) -> Result<WithdrawOutcome>;

    /// Loads an account with its transaction log.
    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>>;

    /// Handles one `OrderCreated`.
    ///
    /// Records the inbox receipt, attempts the withdrawal and writes the
    /// matching `PaymentCompleted` or `PaymentFailed` outbox message, all in
    /// one unit. A receipt seen before yields [`Settlement::Duplicate`] and
    /// touches nothing.
    async fn settle_order_payment(
        &self,
        receipt: &InboxReceipt,
        order: &OrderCreatedData,
    ) -> Result<Settlement>;
}
