//! In-memory ledger store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IntegrationEvent, MessageId, Money, OrderCreatedData, UserId};
use messaging::{
    DeadLetter, DeadLetterStore, InboxReceipt, InboxStatus, InboxStore, InboxTable, OutboxMessage,
    OutboxStore, OutboxTable,
};
use tokio::sync::{Mutex, Notify};

use crate::account::{Account, WithdrawFailure, WithdrawOutcome};
use crate::error::{LedgerError, Result};
use crate::store::{LedgerStore, Settlement};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<UserId, Account>,
    outbox: OutboxTable,
    inbox: InboxTable,
    dead_letters: Vec<DeadLetter>,
    unavailable: bool,
}

impl LedgerState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory ledger store.
///
/// All state sits behind one mutex, so every method is trivially atomic and
/// operations on an account are serialized. No lock is held across any
/// call outside the store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    committed: Arc<Notify>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`LedgerError::Unavailable`] while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Returns the number of accounts.
    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: Account) -> Result<Account> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if state.accounts.contains_key(&account.user_id) {
            return Err(LedgerError::InvalidArgument(format!(
                "account already exists for user {}",
                account.user_id
            )));
        }
        state.accounts.insert(account.user_id, account.clone());
        Ok(account)
    }

    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Account> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;
        account.deposit(amount)?;
        Ok(account.clone())
    }

    async fn withdraw(&self, user_id: UserId, amount: Money) -> Result<WithdrawOutcome> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let Some(account) = state.accounts.get_mut(&user_id) else {
            return Ok(WithdrawOutcome::rejected(WithdrawFailure::AccountNotFound));
        };
        Ok(account.withdraw(amount, None).map(|_| ()).into())
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.accounts.get(&user_id).cloned())
    }

    async fn settle_order_payment(
        &self,
        receipt: &InboxReceipt,
        order: &OrderCreatedData,
    ) -> Result<Settlement> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if state.inbox.contains(receipt) {
            return Ok(Settlement::Duplicate);
        }

        // Withdraw from a staged copy; it replaces the account only once the
        // outgoing message is built.
        let staged = match state.accounts.get(&order.user_id) {
            Some(account) => {
                let mut staged = account.clone();
                let applied = staged
                    .withdraw(order.total_amount, Some(order.order_id.to_string()))
                    .map(|_| ());
                applied.map(|()| staged)
            }
            None => Err(WithdrawFailure::AccountNotFound),
        };
        let event = match &staged {
            Ok(_) => IntegrationEvent::payment_completed(order.order_id),
            Err(reason) => IntegrationEvent::payment_failed(order.order_id, reason.as_str()),
        };
        let message = OutboxMessage::for_event(&event)?;

        let settlement = match staged {
            Ok(account) => {
                state.accounts.insert(order.user_id, account);
                Settlement::Completed
            }
            Err(reason) => Settlement::Failed(reason),
        };
        state.inbox.try_insert(receipt, Utc::now());
        state.outbox.push(message);
        drop(state);
        self.committed.notify_one();

        Ok(settlement)
    }
}

#[async_trait]
impl OutboxStore for InMemoryLedgerStore {
    async fn fetch_unsent(&self, limit: usize) -> messaging::Result<Vec<OutboxMessage>> {
        Ok(self.state.lock().await.outbox.unsent(limit))
    }

    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> messaging::Result<bool> {
        self.state.lock().await.outbox.mark_sent(id, sent_at)
    }

    async fn record_failure(&self, id: MessageId, error: &str) -> messaging::Result<()> {
        self.state.lock().await.outbox.record_failure(id, error)
    }

    async fn list_outbox(&self) -> messaging::Result<Vec<OutboxMessage>> {
        Ok(self.state.lock().await.outbox.all().to_vec())
    }

    fn wake_signal(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.committed))
    }
}

#[async_trait]
impl InboxStore for InMemoryLedgerStore {
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> messaging::Result<InboxStatus> {
        Ok(self.state.lock().await.inbox.try_insert(receipt, Utc::now()))
    }

    async fn is_processed(&self, receipt: &InboxReceipt) -> messaging::Result<bool> {
        Ok(self.state.lock().await.inbox.contains(receipt))
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryLedgerStore {
    async fn dead_letter(&self, letter: DeadLetter) -> messaging::Result<()> {
        self.state.lock().await.dead_letters.push(letter);
        Ok(())
    }

    async fn list_dead_letters(&self) -> messaging::Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead_letters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, PAYMENT_COMPLETED, PAYMENT_FAILED};

    async fn store_with(user_id: UserId, cents: i64) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        store
            .create_account(Account::open(user_id, Money::from_cents(cents)).unwrap())
            .await
            .unwrap();
        store
    }

    fn order_created(user_id: UserId, cents: i64) -> OrderCreatedData {
        OrderCreatedData {
            order_id: OrderId::new(),
            user_id,
            total_amount: Money::from_cents(cents),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_account_is_rejected() {
        let user_id = UserId::new();
        let store = store_with(user_id, 0).await;

        let again = store
            .create_account(Account::open(user_id, Money::zero()).unwrap())
            .await;
        assert!(matches!(again, Err(LedgerError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn deposit_to_missing_account_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let result = store.deposit(UserId::new(), Money::from_cents(10)).await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn withdraw_from_missing_account_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let outcome = store.withdraw(UserId::new(), Money::from_cents(10)).await.unwrap();
        assert_eq!(
            outcome,
            WithdrawOutcome::rejected(WithdrawFailure::AccountNotFound)
        );
    }

    #[tokio::test]
    async fn settlement_writes_withdrawal_and_completed_event_together() {
        let user_id = UserId::new();
        let store = store_with(user_id, 100).await;
        let order = order_created(user_id, 60);
        let receipt = InboxReceipt::new(MessageId::new(), "payments.order-created");

        let settlement = store.settle_order_payment(&receipt, &order).await.unwrap();

        assert_eq!(settlement, Settlement::Completed);
        let account = store.get_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, Money::from_cents(40));
        assert_eq!(account.transactions.len(), 1);
        let reference = account.transactions[0].reference.clone();
        assert_eq!(reference, Some(order.order_id.to_string()));
        assert!(account.is_consistent());
        let outbox = store.list_outbox().await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].message_type, PAYMENT_COMPLETED);
        assert_eq!(outbox[0].aggregate_id, order.order_id.to_string());
        assert!(store.is_processed(&receipt).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_settlement_has_no_effect() {
        let user_id = UserId::new();
        let store = store_with(user_id, 100).await;
        let order = order_created(user_id, 60);
        let receipt = InboxReceipt::new(MessageId::new(), "payments.order-created");

        store.settle_order_payment(&receipt, &order).await.unwrap();
        let again = store.settle_order_payment(&receipt, &order).await.unwrap();

        assert_eq!(again, Settlement::Duplicate);
        let account = store.get_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.transactions.len(), 1);
        assert_eq!(account.balance, Money::from_cents(40));
        assert_eq!(store.list_outbox().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insufficient_funds_writes_failed_event_only() {
        let user_id = UserId::new();
        let store = store_with(user_id, 50).await;
        let order = order_created(user_id, 60);
        let receipt = InboxReceipt::new(MessageId::new(), "payments.order-created");

        let settlement = store.settle_order_payment(&receipt, &order).await.unwrap();

        assert_eq!(
            settlement,
            Settlement::Failed(WithdrawFailure::InsufficientFunds)
        );
        let account = store.get_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, Money::from_cents(50));
        assert!(account.transactions.is_empty());
        let outbox = store.list_outbox().await.unwrap();
        assert_eq!(outbox[0].message_type, PAYMENT_FAILED);
        assert_eq!(outbox[0].payload["data"]["reason"], "insufficient funds");
    }

    #[tokio::test]
    async fn zero_total_settles_as_invalid_amount() {
        let user_id = UserId::new();
        let store = store_with(user_id, 50).await;
        let order = order_created(user_id, 0);
        let receipt = InboxReceipt::new(MessageId::new(), "payments.order-created");

        let settlement = store.settle_order_payment(&receipt, &order).await.unwrap();

        assert_eq!(settlement, Settlement::Failed(WithdrawFailure::InvalidAmount));
        let account = store.get_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, Money::from_cents(50));
        assert!(account.transactions.is_empty());
        assert!(store.is_processed(&receipt).await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_changes_nothing() {
        let user_id = UserId::new();
        let store = store_with(user_id, 100).await;
        store.set_unavailable(true).await;
        let receipt = InboxReceipt::new(MessageId::new(), "payments.order-created");

        let result = store
            .settle_order_payment(&receipt, &order_created(user_id, 10))
            .await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));

        store.set_unavailable(false).await;
        assert!(!store.is_processed(&receipt).await.unwrap());
        assert!(store.list_outbox().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_exactly_one_succeeds() {
        for _ in 0..25 {
            let user_id = UserId::new();
            let store = store_with(user_id, 100).await;

            let a = tokio::spawn({
                let store = store.clone();
                async move { store.withdraw(user_id, Money::from_cents(60)).await }
            });
            let b = tokio::spawn({
                let store = store.clone();
                async move { store.withdraw(user_id, Money::from_cents(60)).await }
            });

            let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
            assert_eq!(outcomes.iter().filter(|o| o.ok).count(), 1);

            let account = store.get_account(user_id).await.unwrap().unwrap();
            assert_eq!(account.balance, Money::from_cents(40));
            assert!(account.is_consistent());
        }
    }
}
