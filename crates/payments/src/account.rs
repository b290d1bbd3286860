//! Account and transaction log.
//!
//! All balance rules live here as plain methods. Stores call them inside
//! their atomic unit and persist the result; they never adjust balances on
//! their own.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{Money, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "Deposit",
            TransactionKind::Withdrawal => "Withdrawal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Deposit" => Ok(TransactionKind::Deposit),
            "Withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown transaction kind '{other}'"
            ))),
        }
    }
}

/// One append-only ledger entry.
///
/// `amount` is signed: positive for deposits, negative for withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: UserId,
    pub amount: Money,
    pub kind: TransactionKind,
    /// What caused the entry, e.g. the order a withdrawal paid for.
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Why a withdrawal was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawFailure {
    AccountNotFound,
    InsufficientFunds,
    InvalidAmount,
}

impl WithdrawFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawFailure::AccountNotFound => "account not found",
            WithdrawFailure::InsufficientFunds => "insufficient funds",
            WithdrawFailure::InvalidAmount => "invalid amount",
        }
    }
}

impl fmt::Display for WithdrawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a withdrawal attempt.
///
/// A rejected withdrawal changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawOutcome {
    pub ok: bool,
    pub reason: Option<WithdrawFailure>,
}

impl WithdrawOutcome {
    pub fn succeeded() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn rejected(reason: WithdrawFailure) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

impl From<std::result::Result<(), WithdrawFailure>> for WithdrawOutcome {
    fn from(result: std::result::Result<(), WithdrawFailure>) -> Self {
        match result {
            Ok(()) => Self::succeeded(),
            Err(reason) => Self::rejected(reason),
        }
    }
}

/// A user's account.
///
/// Invariant: `balance == initial_balance + Σ transactions.amount`, and the
/// balance never goes below zero through a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub initial_balance: Money,
    pub balance: Money,
    pub transactions: Vec<Transaction>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Opens an account. The initial balance is not a transaction.
    pub fn open(user_id: UserId, initial_balance: Money) -> Result<Self> {
        if initial_balance.is_negative() {
            return Err(LedgerError::InvalidArgument(format!(
                "initial balance must not be negative, got {initial_balance}"
            )));
        }
        Ok(Self {
            user_id,
            initial_balance,
            balance: initial_balance,
            transactions: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Credits the account and returns the new entry.
    pub fn deposit(&mut self, amount: Money) -> Result<&Transaction> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidArgument(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidArgument(format!("deposit of {amount} overflows the balance"))
        })?;
        Ok(self.record(amount, TransactionKind::Deposit, None))
    }

    /// Checks a withdrawal without applying it.
    pub fn can_withdraw(&self, amount: Money) -> std::result::Result<(), WithdrawFailure> {
        if !amount.is_positive() {
            return Err(WithdrawFailure::InvalidAmount);
        }
        if self.balance < amount {
            return Err(WithdrawFailure::InsufficientFunds);
        }
        Ok(())
    }

    /// Debits the account if the balance covers `amount`.
    ///
    /// On rejection the account is untouched.
    pub fn withdraw(
        &mut self,
        amount: Money,
        reference: Option<String>,
    ) -> std::result::Result<&Transaction, WithdrawFailure> {
        self.can_withdraw(amount)?;
        self.balance -= amount;
        Ok(self.record(amount.negate(), TransactionKind::Withdrawal, reference))
    }

    /// Returns true if the balance equals the opening balance plus the log.
    pub fn is_consistent(&self) -> bool {
        let logged: Money = self.transactions.iter().map(|t| t.amount).sum();
        self.balance == self.initial_balance + logged && !self.balance.is_negative()
    }

    fn record(
        &mut self,
        amount: Money,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> &Transaction {
        self.transactions.push(Transaction {
            id: TransactionId::new(),
            account_id: self.user_id,
            amount,
            kind,
            reference,
            timestamp: Utc::now(),
        });
        // Just pushed.
        &self.transactions[self.transactions.len() - 1]
    }
}
