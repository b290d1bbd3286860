//! Payment processor: account operations over a ledger store.

use common::{Money, UserId};

use crate::account::{Account, WithdrawFailure, WithdrawOutcome};
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;

/// Service for managing accounts and balances.
///
/// Wraps a [`LedgerStore`] and adds argument validation, tracing and metrics.
/// The atomicity of each operation is the store's.
#[derive(Clone)]
pub struct PaymentProcessor<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> PaymentProcessor<S> {
    /// Creates a new processor over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens an account with a non-negative initial balance.
    #[tracing::instrument(skip(self))]
    pub async fn create_account(&self, user_id: UserId, initial_balance: Money) -> Result<Account> {
        let account = Account::open(user_id, initial_balance)?;
        let account = self.store.create_account(account).await?;
        tracing::info!(%user_id, balance = %account.balance, "account created");
        Ok(account)
    }

    /// Credits an account.
    #[tracing::instrument(skip(self))]
    pub async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Account> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidArgument(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }
        let account = self.store.deposit(user_id, amount).await?;
        tracing::info!(%user_id, %amount, balance = %account.balance, "deposit applied");
        Ok(account)
    }

    /// Debits an account if it has the funds.
    #[tracing::instrument(skip(self))]
    pub async fn withdraw(&self, user_id: UserId, amount: Money) -> Result<WithdrawOutcome> {
        let outcome = self.store.withdraw(user_id, amount).await?;
        record_withdrawal(&outcome);
        match outcome.reason {
            None => tracing::info!(%user_id, %amount, "withdrawal applied"),
            Some(reason) => tracing::info!(%user_id, %amount, %reason, "withdrawal rejected"),
        }
        Ok(outcome)
    }

    /// Returns the current balance.
    #[tracing::instrument(skip(self))]
    pub async fn get_balance(&self, user_id: UserId) -> Result<Money> {
        Ok(self.get_account(user_id).await?.balance)
    }

    /// Returns the account with its transaction log.
    #[tracing::instrument(skip(self))]
    pub async fn get_account(&self, user_id: UserId) -> Result<Account> {
        self.store
            .get_account(user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }
}

pub(crate) fn record_withdrawal(outcome: &WithdrawOutcome) {
    let label = match outcome.reason {
        None => "ok",
        Some(WithdrawFailure::AccountNotFound) => "account_not_found",
        Some(WithdrawFailure::InsufficientFunds) => "insufficient_funds",
        Some(WithdrawFailure::InvalidAmount) => "invalid_amount",
    };
    metrics::counter!("payments_withdrawals_total", "outcome" => label).increment(1);
}
