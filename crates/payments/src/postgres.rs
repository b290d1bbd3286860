//! PostgreSQL ledger store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IntegrationEvent, MessageId, Money, OrderCreatedData, TransactionId, UserId};
use messaging::{
    DeadLetter, DeadLetterStore, InboxReceipt, InboxStatus, InboxStore, OutboxMessage, OutboxStore,
    PostgresMessaging, insert_outbox_message, try_insert_inbox,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::account::{Account, Transaction, TransactionKind, WithdrawFailure, WithdrawOutcome};
use crate::error::{LedgerError, Result};
use crate::store::{LedgerStore, Settlement};

/// PostgreSQL-backed ledger store.
///
/// Balance changes lock the account row with `SELECT ... FOR UPDATE`, so
/// concurrent operations on one account serialize in the database.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    messaging: PostgresMessaging,
}

impl PostgresLedgerStore {
    /// Creates a new store over the payments database.
    pub fn new(pool: PgPool) -> Self {
        Self {
            messaging: PostgresMessaging::new(pool.clone()),
            pool,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the payments database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations/payments").run(&self.pool).await
    }

    async fn lock_balance(conn: &mut PgConnection, user_id: UserId) -> Result<Option<Money>> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance_cents FROM accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;
        Ok(balance.map(Money::from_cents))
    }

    /// Moves the balance by `amount` and logs the entry.
    ///
    /// Returns false, writing nothing, when the balance would go negative.
    async fn apply(
        conn: &mut PgConnection,
        user_id: UserId,
        amount: Money,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE accounts SET balance_cents = balance_cents + $2
            WHERE user_id = $1 AND balance_cents + $2 >= 0
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, amount_cents, kind, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(TransactionId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .bind(kind.as_str())
        .bind(reference)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(true)
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let kind: String = row.try_get("kind")?;
        Ok(Transaction {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            account_id: UserId::from_uuid(row.try_get::<Uuid, _>("account_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            kind: kind.parse()?,
            reference: row.try_get("reference")?,
            timestamp: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn create_account(&self, account: Account) -> Result<Account> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, initial_balance_cents, balance_cents, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(account.user_id.as_uuid())
        .bind(account.initial_balance.cents())
        .bind(account.balance.cents())
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "account already exists for user {}",
                account.user_id
            )));
        }
        Ok(account)
    }

    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Account> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidArgument(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let Some(balance) = Self::lock_balance(&mut tx, user_id).await? else {
            return Err(LedgerError::AccountNotFound(user_id));
        };
        if balance.checked_add(amount).is_none() {
            return Err(LedgerError::InvalidArgument(format!(
                "deposit of {amount} overflows the balance"
            )));
        }
        if !Self::apply(&mut tx, user_id, amount, TransactionKind::Deposit, None).await? {
            return Err(LedgerError::AccountNotFound(user_id));
        }
        tx.commit().await?;

        self.get_account(user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    async fn withdraw(&self, user_id: UserId, amount: Money) -> Result<WithdrawOutcome> {
        if !amount.is_positive() {
            return Ok(WithdrawOutcome::rejected(WithdrawFailure::InvalidAmount));
        }

        let mut tx = self.pool.begin().await?;
        let Some(balance) = Self::lock_balance(&mut tx, user_id).await? else {
            return Ok(WithdrawOutcome::rejected(WithdrawFailure::AccountNotFound));
        };
        if balance < amount {
            return Ok(WithdrawOutcome::rejected(WithdrawFailure::InsufficientFunds));
        }
        let debit = amount.negate();
        if !Self::apply(&mut tx, user_id, debit, TransactionKind::Withdrawal, None).await? {
            return Ok(WithdrawOutcome::rejected(WithdrawFailure::InsufficientFunds));
        }
        tx.commit().await?;

        Ok(WithdrawOutcome::succeeded())
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>> {
        let Some(row) = sqlx::query(
            "SELECT user_id, initial_balance_cents, balance_cents, created_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount_cents, kind, reference, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let transactions = rows
            .into_iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Account {
            user_id,
            initial_balance: Money::from_cents(row.try_get("initial_balance_cents")?),
            balance: Money::from_cents(row.try_get("balance_cents")?),
            transactions,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn settle_order_payment(
        &self,
        receipt: &InboxReceipt,
        order: &OrderCreatedData,
    ) -> Result<Settlement> {
        let mut tx = self.pool.begin().await?;

        if try_insert_inbox(&mut tx, receipt, Utc::now()).await? == InboxStatus::AlreadyProcessed {
            return Ok(Settlement::Duplicate);
        }

        let mut verdict = match Self::lock_balance(&mut tx, order.user_id).await? {
            None => Err(WithdrawFailure::AccountNotFound),
            Some(_) if !order.total_amount.is_positive() => Err(WithdrawFailure::InvalidAmount),
            Some(balance) if balance < order.total_amount => Err(WithdrawFailure::InsufficientFunds),
            Some(_) => Ok(()),
        };

        if verdict.is_ok() {
            let applied = Self::apply(
                &mut tx,
                order.user_id,
                order.total_amount.negate(),
                TransactionKind::Withdrawal,
                Some(order.order_id.to_string()),
            )
            .await?;
            if !applied {
                verdict = Err(WithdrawFailure::InsufficientFunds);
            }
        }

        let event = match verdict {
            Ok(()) => IntegrationEvent::payment_completed(order.order_id),
            Err(reason) => IntegrationEvent::payment_failed(order.order_id, reason.as_str()),
        };
        insert_outbox_message(&mut tx, &OutboxMessage::for_event(&event)?).await?;
        tx.commit().await?;
        self.messaging.notify_committed();

        Ok(match verdict {
            Ok(()) => Settlement::Completed,
            Err(reason) => Settlement::Failed(reason),
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresLedgerStore {
    async fn fetch_unsent(&self, limit: usize) -> messaging::Result<Vec<OutboxMessage>> {
        self.messaging.fetch_unsent(limit).await
    }

    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> messaging::Result<bool> {
        self.messaging.mark_sent(id, sent_at).await
    }

    async fn record_failure(&self, id: MessageId, error: &str) -> messaging::Result<()> {
        self.messaging.record_failure(id, error).await
    }

    async fn list_outbox(&self) -> messaging::Result<Vec<OutboxMessage>> {
        self.messaging.list_outbox().await
    }

    fn wake_signal(&self) -> Option<Arc<Notify>> {
        self.messaging.wake_signal()
    }
}

#[async_trait]
impl InboxStore for PostgresLedgerStore {
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> messaging::Result<InboxStatus> {
        self.messaging.try_begin_processing(receipt).await
    }

    async fn is_processed(&self, receipt: &InboxReceipt) -> messaging::Result<bool> {
        self.messaging.is_processed(receipt).await
    }
}

#[async_trait]
impl DeadLetterStore for PostgresLedgerStore {
    async fn dead_letter(&self, letter: DeadLetter) -> messaging::Result<()> {
        self.messaging.dead_letter(letter).await
    }

    async fn list_dead_letters(&self) -> messaging::Result<Vec<DeadLetter>> {
        self.messaging.list_dead_letters().await
    }
}
