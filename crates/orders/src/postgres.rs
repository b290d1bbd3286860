//! PostgreSQL order store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, Money, OrderId, ProductId, UserId};
use messaging::{
    DeadLetter, DeadLetterStore, InboxReceipt, InboxStatus, InboxStore, OutboxMessage, OutboxStore,
    PostgresMessaging, insert_outbox_message, try_insert_inbox,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{OrderError, Result};
use crate::order::{Order, OrderItem};
use crate::state::OrderStatus;
use crate::store::{OrderStore, OutcomeApplied};

/// PostgreSQL-backed order store.
///
/// Orders, items, outbox and inbox live in the same database, so each
/// trait method is one transaction.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    messaging: PostgresMessaging,
}

impl PostgresOrderStore {
    /// Creates a new store over the orders database.
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

    /// Runs the orders database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations/orders").run(&self.pool).await
    }

    async fn load(conn: &mut PgConnection, order_id: OrderId, for_update: bool) -> Result<Option<Order>> {
        let sql = if for_update {
            "SELECT id, user_id, total_cents, status, created_at, updated_at FROM orders WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT id, user_id, total_cents, status, created_at, updated_at FROM orders WHERE id = $1"
        };
        let Some(row) = sqlx::query(sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let items = Self::load_items(conn, order_id).await?;
        Self::row_to_order(row, items).map(Some)
    }

    async fn load_items(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<OrderItem> {
                let quantity: i32 = row.try_get("quantity")?;
                Ok(OrderItem::new(
                    ProductId::new(row.try_get::<String, _>("product_id")?),
                    u32::try_from(quantity).unwrap_or_default(),
                    Money::from_cents(row.try_get("unit_price_cents")?),
                ))
            })
            .collect()
    }

    fn row_to_order(row: PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order::restore(
            OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            items,
            Money::from_cents(row.try_get("total_cents")?),
            status.parse::<OrderStatus>()?,
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
        ))
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert_with_event(&self, order: &Order, message: OutboxMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.total_amount().cents())
        .bind(order.status().as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await?;

        for (line_no, item) in order.items().iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(line_no as i32)
            .bind(item.product_id.as_str())
            .bind(quantity)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        insert_outbox_message(&mut tx, &message).await?;
        tx.commit().await?;
        self.messaging.notify_committed();
        Ok(())
    }

    async fn apply_payment_outcome(
        &self,
        receipt: &InboxReceipt,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<OutcomeApplied> {
        let mut tx = self.pool.begin().await?;

        if try_insert_inbox(&mut tx, receipt, Utc::now()).await? == InboxStatus::AlreadyProcessed {
            return Ok(OutcomeApplied::Duplicate);
        }

        let applied = match Self::load(&mut tx, order_id, true).await? {
            None => OutcomeApplied::OrderMissing,
            Some(mut order) => match order.transition_to(target) {
                Ok(transition) => {
                    sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
                        .bind(order_id.as_uuid())
                        .bind(order.status().as_str())
                        .bind(order.updated_at())
                        .execute(&mut *tx)
                        .await?;
                    OutcomeApplied::Transitioned(transition)
                }
                Err(OrderError::AlreadyTerminal { status, .. }) => {
                    OutcomeApplied::AlreadyTerminal(status)
                }
                Err(e) => return Err(e),
            },
        };
        tx.commit().await?;
        Ok(applied)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, order_id, false).await
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total_cents, status, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
            let items = Self::load_items(&mut conn, order_id).await?;
            orders.push(Self::row_to_order(row, items)?);
        }
        Ok(orders)
    }
}

#[async_trait]
impl OutboxStore for PostgresOrderStore {
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
impl InboxStore for PostgresOrderStore {
    async fn try_begin_processing(&self, receipt: &InboxReceipt) -> messaging::Result<InboxStatus> {
        self.messaging.try_begin_processing(receipt).await
    }

    async fn is_processed(&self, receipt: &InboxReceipt) -> messaging::Result<bool> {
        self.messaging.is_processed(receipt).await
    }
}

#[async_trait]
impl DeadLetterStore for PostgresOrderStore {
    async fn dead_letter(&self, letter: DeadLetter) -> messaging::Result<()> {
        self.messaging.dead_letter(letter).await
    }

    async fn list_dead_letters(&self) -> messaging::Result<Vec<DeadLetter>> {
        self.messaging.list_dead_letters().await
    }
}
