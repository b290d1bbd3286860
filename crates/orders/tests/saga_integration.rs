//! End-to-end saga tests over the in-memory bus.
//!
//! Both services run in-process: their stores, dispatchers and partitioned
//! consumers are wired to one `InMemoryBus`, exactly as the API binary does
//! without databases.

use std::sync::Arc;
use std::time::Duration;

use common::{Money, PAYMENT_COMPLETED, UserId};
use messaging::{
    ConsumerConfig, DeadLetterStore, DispatcherConfig, InMemoryBus, MessageHandler,
    OutboxDispatcher, OutboxStore, PartitionedConsumer, RetryPolicy,
};
use orders::{
    InMemoryOrderStore, InMemoryProductCatalog, Order, OrderLine, OrderSagaCoordinator,
    OrderStatus, PaymentOutcomeHandler, SubscriptionRegistry,
};
use payments::{InMemoryLedgerStore, PaymentProcessor, PaymentSagaReactor};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Coordinator =
    OrderSagaCoordinator<InMemoryOrderStore, InMemoryProductCatalog, SubscriptionRegistry>;

struct Harness {
    bus: InMemoryBus,
    orders_store: InMemoryOrderStore,
    ledger: InMemoryLedgerStore,
    coordinator: Arc<Coordinator>,
    registry: SubscriptionRegistry,
    processor: PaymentProcessor<InMemoryLedgerStore>,
    orders_dispatcher: Option<OutboxDispatcher<InMemoryOrderStore, InMemoryBus>>,
    payments_dispatcher: Option<OutboxDispatcher<InMemoryLedgerStore, InMemoryBus>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        batch_size: 100,
        poll_interval: Duration::from_millis(10),
        base_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        lanes: 4,
        lane_capacity: 64,
        retry: RetryPolicy {
            max_attempts: None,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
    }
}

impl Harness {
    /// Wires both services. Dispatchers run as background tasks when
    /// `background_dispatch` is set and are driven by hand otherwise.
    async fn start(background_dispatch: bool) -> Self {
        let bus = InMemoryBus::new();
        let orders_store = InMemoryOrderStore::new();
        let ledger = InMemoryLedgerStore::new();
        let registry = SubscriptionRegistry::default();
        let catalog = InMemoryProductCatalog::with_products([
            ("SKU-001", Money::from_cents(1000)),
            ("SKU-002", Money::from_cents(250)),
        ]);
        let coordinator = Arc::new(OrderSagaCoordinator::new(
            orders_store.clone(),
            catalog,
            registry.clone(),
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let reactor = PaymentSagaReactor::new(ledger.clone());
        let reactor_rx = bus.subscribe(reactor.message_types()).await;
        tasks.push(
            PartitionedConsumer::new(reactor, ledger.clone(), consumer_config())
                .spawn(reactor_rx, shutdown_rx.clone()),
        );

        let handler = PaymentOutcomeHandler::new(Arc::clone(&coordinator));
        let handler_rx = bus.subscribe(handler.message_types()).await;
        tasks.push(
            PartitionedConsumer::new(handler, orders_store.clone(), consumer_config())
                .spawn(handler_rx, shutdown_rx.clone()),
        );

        let orders_dispatcher = OutboxDispatcher::new(
            "orders",
            orders_store.clone(),
            bus.clone(),
            dispatcher_config(),
        );
        let payments_dispatcher =
            OutboxDispatcher::new("payments", ledger.clone(), bus.clone(), dispatcher_config());

        let (orders_dispatcher, payments_dispatcher) = if background_dispatch {
            tasks.push(tokio::spawn(orders_dispatcher.run(shutdown_rx.clone())));
            tasks.push(tokio::spawn(payments_dispatcher.run(shutdown_rx)));
            (None, None)
        } else {
            (Some(orders_dispatcher), Some(payments_dispatcher))
        };

        Self {
            bus,
            processor: PaymentProcessor::new(ledger.clone()),
            orders_store,
            ledger,
            coordinator,
            registry,
            orders_dispatcher,
            payments_dispatcher,
            shutdown,
            tasks,
        }
    }

    async fn account(&self, cents: i64) -> UserId {
        let user_id = UserId::new();
        self.processor
            .create_account(user_id, Money::from_cents(cents))
            .await
            .unwrap();
        user_id
    }

    async fn place(&self, user_id: UserId, lines: Vec<OrderLine>) -> Order {
        self.coordinator.create_order(user_id, lines).await.unwrap()
    }

    async fn wait_for_status(&self, order: &Order, status: OrderStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self.coordinator.get_order(order.id()).await.unwrap().status();
            if current == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "order {} stuck in {current}, expected {status}",
                order.id()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paid_order_withdraws_the_total() {
    let harness = Harness::start(true).await;
    let user_id = harness.account(5000).await;

    let order = harness
        .place(
            user_id,
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 4)],
        )
        .await;
    assert_eq!(order.status(), OrderStatus::PaymentPending);

    harness.wait_for_status(&order, OrderStatus::Paid).await;
    assert_eq!(
        harness.processor.get_balance(user_id).await.unwrap(),
        Money::from_cents(2000)
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insufficient_funds_fail_the_order_without_withdrawing() {
    let harness = Harness::start(true).await;
    let user_id = harness.account(500).await;

    let order = harness.place(user_id, vec![OrderLine::new("SKU-001", 1)]).await;

    harness.wait_for_status(&order, OrderStatus::Failed).await;
    let account = harness.processor.get_account(user_id).await.unwrap();
    assert_eq!(account.balance, Money::from_cents(500));
    assert!(account.transactions.is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_user_fails_the_order() {
    let harness = Harness::start(true).await;

    let order = harness
        .place(UserId::new(), vec![OrderLine::new("SKU-002", 1)])
        .await;

    harness.wait_for_status(&order, OrderStatus::Failed).await;
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscriber_sees_the_final_status() {
    let harness = Harness::start(true).await;
    let user_id = harness.account(1000).await;

    // Hold the announcement back until the subscription exists.
    harness.bus.set_fail_on_publish(true).await;
    let order = harness.place(user_id, vec![OrderLine::new("SKU-001", 1)]).await;
    let mut subscription = harness.registry.subscribe(order.id());
    harness.bus.set_fail_on_publish(false).await;

    let change = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.order_id, order.id());
    assert_eq!(change.status, OrderStatus::Paid);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_delivery_withdraws_once() {
    let harness = Harness::start(true).await;
    harness.bus.set_duplicate_delivery(true).await;
    let user_id = harness.account(5000).await;

    let first = harness.place(user_id, vec![OrderLine::new("SKU-001", 1)]).await;
    let second = harness.place(user_id, vec![OrderLine::new("SKU-002", 2)]).await;

    harness.wait_for_status(&first, OrderStatus::Paid).await;
    harness.wait_for_status(&second, OrderStatus::Paid).await;

    let account = harness.processor.get_account(user_id).await.unwrap();
    assert_eq!(account.transactions.len(), 2);
    assert_eq!(account.balance, Money::from_cents(3500));

    let completions = harness
        .ledger
        .list_outbox()
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.message_type == PAYMENT_COMPLETED)
        .count();
    assert_eq!(completions, 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ledger_outage_delays_the_payment_without_losing_it() {
    let harness = Harness::start(true).await;
    let user_id = harness.account(5000).await;
    harness.ledger.set_unavailable(true).await;

    let order = harness.place(user_id, vec![OrderLine::new("SKU-001", 1)]).await;

    // Long enough for the reactor to fail many times over.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stored = harness.coordinator.get_order(order.id()).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::PaymentPending);

    harness.ledger.set_unavailable(false).await;
    harness.wait_for_status(&order, OrderStatus::Paid).await;
    assert_eq!(
        harness.processor.get_balance(user_id).await.unwrap(),
        Money::from_cents(4000)
    );
    assert!(harness.ledger.list_dead_letters().await.unwrap().is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outbox_holds_messages_while_the_bus_is_down() {
    let harness = Harness::start(false).await;
    let orders_dispatcher = harness.orders_dispatcher.as_ref().unwrap();
    let payments_dispatcher = harness.payments_dispatcher.as_ref().unwrap();
    let user_id = harness.account(5000).await;

    harness.bus.set_fail_on_publish(true).await;
    let order = harness.place(user_id, vec![OrderLine::new("SKU-001", 1)]).await;

    for _ in 0..3 {
        let report = orders_dispatcher.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
    }

    // The order is committed, its announcement is not sent.
    let stored = harness.coordinator.get_order(order.id()).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::PaymentPending);
    let outbox = harness.orders_store.list_outbox().await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].sent_at, None);
    assert_eq!(outbox[0].attempts, 3);
    assert_eq!(harness.bus.published_count().await, 0);

    harness.bus.set_fail_on_publish(false).await;
    let report = orders_dispatcher.run_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert!(harness.orders_store.list_outbox().await.unwrap()[0].is_sent());

    // Wait for the reactor to settle, then drain the payment outcome.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.ledger.list_outbox().await.unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "reactor never settled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let report = payments_dispatcher.run_once().await.unwrap();
    assert_eq!(report.published, 1);

    harness.wait_for_status(&order, OrderStatus::Paid).await;
    harness.stop().await;
}
