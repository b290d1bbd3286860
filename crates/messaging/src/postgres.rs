//! PostgreSQL outbox, inbox and dead-letter tables.
//!
//! The insert helpers take a connection so service stores can call them
//! inside their own transaction, next to the domain rows they accompany.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    DeadLetter, DeadLetterStore, InboxReceipt, InboxStatus, InboxStore, MessagingError,
    OutboxMessage, OutboxStore, Result,
};

/// Writes an outbox row on the caller's connection.
pub async fn insert_outbox_message(conn: &mut PgConnection, message: &OutboxMessage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, message_type, aggregate_id, payload, created_at, sent_at, attempts, last_error)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(&message.message_type)
    .bind(&message.aggregate_id)
    .bind(&message.payload)
    .bind(message.created_at)
    .bind(message.sent_at)
    .bind(message.attempts as i32)
    .bind(&message.last_error)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts the inbox row unless it exists, on the caller's connection.
///
/// Concurrent callers with the same receipt serialize on the primary key;
/// exactly one of them sees [`InboxStatus::New`].
pub async fn try_insert_inbox(
    conn: &mut PgConnection,
    receipt: &InboxReceipt,
    processed_at: DateTime<Utc>,
) -> Result<InboxStatus> {
    let result = sqlx::query(
        r#"
        INSERT INTO inbox_records (message_id, consumer_id, processed_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (message_id, consumer_id) DO NOTHING
        "#,
    )
    .bind(receipt.message_id.as_uuid())
    .bind(&receipt.consumer_id)
    .bind(processed_at)
    .execute(conn)
    .await?;

    Ok(if result.rows_affected() == 1 {
        InboxStatus::New
    } else {
        InboxStatus::AlreadyProcessed
    })
}

/// Outbox, inbox and dead-letter access over one service database.
#[derive(Clone)]
pub struct PostgresMessaging {
    pool: PgPool,
    committed: Arc<Notify>,
}

impl PostgresMessaging {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            committed: Arc::new(Notify::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wakes the dispatcher. Call after committing a transaction that wrote
    /// outbox rows.
    pub fn notify_committed(&self) {
        self.committed.notify_one();
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            message_type: row.try_get("message_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            last_error: row.try_get("last_error")?,
        })
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetter> {
        Ok(DeadLetter {
            message_id: MessageId::from_uuid(row.try_get::<Uuid, _>("message_id")?),
            consumer_id: row.try_get("consumer_id")?,
            message_type: row.try_get("message_type")?,
            partition_key: row.try_get("partition_key")?,
            payload: row.try_get("payload")?,
            reason: row.try_get("reason")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            failed_at: row.try_get("failed_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresMessaging {
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_type, aggregate_id, payload, created_at, sent_at, attempts, last_error
            FROM outbox_messages
            WHERE sent_at IS NULL
            ORDER BY seq ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE outbox_messages SET sent_at = $2 WHERE id = $1 AND sent_at IS NULL")
                .bind(id.as_uuid())
                .bind(sent_at)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM outbox_messages WHERE id = $1)")
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(MessagingError::OutboxMessageNotFound(id))
        }
    }

    async fn record_failure(&self, id: MessageId, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::OutboxMessageNotFound(id));
        }
        Ok(())
    }

    async fn list_outbox(&self) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_type, aggregate_id, payload, created_at, sent_at, attempts, last_error
            FROM outbox_messages
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    fn wake_signal(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.committed))
    }
}

#[async_trait]
impl InboxStore for PostgresMessaging {
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> Result<InboxStatus> {
        let mut conn = self.pool.acquire().await?;
        try_insert_inbox(&mut conn, receipt, Utc::now()).await
    }

    async fn is_processed(&self, receipt: &InboxReceipt) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM inbox_records WHERE message_id = $1 AND consumer_id = $2)",
        )
        .bind(receipt.message_id.as_uuid())
        .bind(&receipt.consumer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl DeadLetterStore for PostgresMessaging {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (message_id, consumer_id, message_type, partition_key, payload, reason, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(letter.message_id.as_uuid())
        .bind(&letter.consumer_id)
        .bind(&letter.message_type)
        .bind(&letter.partition_key)
        .bind(&letter.payload)
        .bind(&letter.reason)
        .bind(letter.attempts as i32)
        .bind(letter.failed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, consumer_id, message_type, partition_key, payload, reason, attempts, failed_at
            FROM dead_letters
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }
}
