//! PostgreSQL integration tests for the order store.
//!
//! These tests share one PostgreSQL container and truncate between tests.
//! Run with:
//!
//! ```bash
//! cargo test -p orders --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{MessageId, Money, ORDER_CREATED, OrderId, UserId};
use messaging::{InboxReceipt, InboxStore, OutboxStore};
use orders::{
    InMemoryProductCatalog, NoopNotifier, OrderLine, OrderSagaCoordinator, OrderStatus,
    OrderStore, OutcomeApplied, PostgresOrderStore,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresOrderStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_items, orders, outbox_messages, inbox_records, dead_letters",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresOrderStore::new(pool)
}

fn coordinator(
    store: PostgresOrderStore,
) -> OrderSagaCoordinator<PostgresOrderStore, InMemoryProductCatalog, NoopNotifier> {
    let catalog = InMemoryProductCatalog::with_products([
        ("SKU-001", Money::from_cents(1000)),
        ("SKU-002", Money::from_cents(250)),
    ]);
    OrderSagaCoordinator::new(store, catalog, NoopNotifier)
}

fn receipt() -> InboxReceipt {
    InboxReceipt::new(MessageId::new(), "orders.payment-outcome")
}

#[tokio::test]
#[serial]
async fn test_order_and_outbox_row_are_committed_together() {
    let store = get_test_store().await;
    let coordinator = coordinator(store.clone());
    let user_id = UserId::new();

    let order = coordinator
        .create_order(
            user_id,
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 1)],
        )
        .await
        .unwrap();

    let loaded = store.get(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::PaymentPending);
    assert_eq!(loaded.total_amount(), Money::from_cents(2250));
    assert_eq!(loaded.items(), order.items());

    let outbox = store.list_outbox().await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].message_type, ORDER_CREATED);
    assert_eq!(outbox[0].aggregate_id, order.id().to_string());
    assert!(!outbox[0].is_sent());
}

#[tokio::test]
#[serial]
async fn test_payment_outcome_is_applied_once() {
    let store = get_test_store().await;
    let coordinator = coordinator(store.clone());
    let order = coordinator
        .create_order(UserId::new(), vec![OrderLine::new("SKU-001", 1)])
        .await
        .unwrap();
    let receipt = receipt();

    let first = store
        .apply_payment_outcome(&receipt, order.id(), OrderStatus::Paid)
        .await
        .unwrap();
    assert!(matches!(first, OutcomeApplied::Transitioned(t) if t.previous == OrderStatus::PaymentPending));

    let again = store
        .apply_payment_outcome(&receipt, order.id(), OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(again, OutcomeApplied::Duplicate);

    let loaded = store.get(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Paid);
}

#[tokio::test]
#[serial]
async fn test_terminal_order_is_never_overwritten() {
    let store = get_test_store().await;
    let coordinator = coordinator(store.clone());
    let order = coordinator
        .create_order(UserId::new(), vec![OrderLine::new("SKU-002", 1)])
        .await
        .unwrap();

    store
        .apply_payment_outcome(&receipt(), order.id(), OrderStatus::Failed)
        .await
        .unwrap();
    let late = receipt();
    let applied = store
        .apply_payment_outcome(&late, order.id(), OrderStatus::Paid)
        .await
        .unwrap();

    assert_eq!(applied, OutcomeApplied::AlreadyTerminal(OrderStatus::Failed));
    assert!(store.is_processed(&late).await.unwrap());
    let loaded = store.get(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Failed);
}

#[tokio::test]
#[serial]
async fn test_outcome_for_missing_order_records_receipt() {
    let store = get_test_store().await;
    let receipt = receipt();

    let applied = store
        .apply_payment_outcome(&receipt, OrderId::new(), OrderStatus::Paid)
        .await
        .unwrap();

    assert_eq!(applied, OutcomeApplied::OrderMissing);
    assert!(store.is_processed(&receipt).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_orders_by_user_newest_first() {
    let store = get_test_store().await;
    let coordinator = coordinator(store.clone());
    let user_id = UserId::new();

    let first = coordinator
        .create_order(user_id, vec![OrderLine::new("SKU-001", 1)])
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = coordinator
        .create_order(user_id, vec![OrderLine::new("SKU-002", 3)])
        .await
        .unwrap();
    coordinator
        .create_order(UserId::new(), vec![OrderLine::new("SKU-001", 1)])
        .await
        .unwrap();

    let orders = coordinator.get_orders_by_user(user_id).await.unwrap();
    let ids: Vec<_> = orders.iter().map(|o| o.id()).collect();
    assert_eq!(ids, vec![second.id(), first.id()]);
    assert_eq!(orders[0].items()[0].quantity, 3);
}

#[tokio::test]
#[serial]
async fn test_mark_sent_is_compare_and_set() {
    let store = get_test_store().await;
    let coordinator = coordinator(store.clone());
    coordinator
        .create_order(UserId::new(), vec![OrderLine::new("SKU-001", 1)])
        .await
        .unwrap();

    let message = store.fetch_unsent(10).await.unwrap().remove(0);
    assert!(store.mark_sent(message.id, Utc::now()).await.unwrap());
    assert!(!store.mark_sent(message.id, Utc::now()).await.unwrap());
    assert!(store.fetch_unsent(10).await.unwrap().is_empty());
}
