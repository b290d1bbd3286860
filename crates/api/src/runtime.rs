//! In-process composition of both services.
//!
//! Each service keeps its own store. They talk only through the bus: two
//! outbox dispatchers publish onto it and two partitioned consumers read
//! from it.

use std::sync::Arc;

use messaging::{
    ConsumerConfig, DispatcherConfig, InMemoryBus, MessageHandler, OutboxDispatcher,
    PartitionedConsumer,
};
use orders::{
    InMemoryProductCatalog, OrderSagaCoordinator, OrderStore, PaymentOutcomeHandler,
    SubscriptionRegistry,
};
use payments::{LedgerStore, PaymentProcessor, PaymentSagaReactor};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Order service coordinator as wired by the server.
pub type Coordinator<O> = OrderSagaCoordinator<O, InMemoryProductCatalog, SubscriptionRegistry>;

/// Shared application state accessible from all handlers.
pub struct AppState<O: OrderStore, L: LedgerStore> {
    pub coordinator: Arc<Coordinator<O>>,
    pub payments: PaymentProcessor<L>,
    pub subscriptions: SubscriptionRegistry,
    /// Storage backend name reported by `/health`.
    pub backend: &'static str,
}

/// Background tuning for the saga runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub dispatcher: DispatcherConfig,
    pub consumer: ConsumerConfig,
}

/// A running saga: both services, the bus and their background tasks.
pub struct SagaRuntime<O: OrderStore, L: LedgerStore> {
    state: Arc<AppState<O, L>>,
    bus: InMemoryBus,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<O, L> SagaRuntime<O, L>
where
    O: OrderStore + Clone + 'static,
    L: LedgerStore + Clone + 'static,
{
    /// Wires both services over a fresh bus and starts the dispatchers and
    /// consumers.
    pub async fn start(
        orders_store: O,
        ledger: L,
        catalog: InMemoryProductCatalog,
        backend: &'static str,
        config: RuntimeConfig,
    ) -> Self {
        let bus = InMemoryBus::new();
        let subscriptions = SubscriptionRegistry::default();
        let coordinator = Arc::new(OrderSagaCoordinator::new(
            orders_store.clone(),
            catalog,
            subscriptions.clone(),
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        let reactor = PaymentSagaReactor::new(ledger.clone());
        let inbound = bus.subscribe(reactor.message_types()).await;
        tasks.push(
            PartitionedConsumer::new(reactor, ledger.clone(), config.consumer.clone())
                .spawn(inbound, shutdown_rx.clone()),
        );

        let handler = PaymentOutcomeHandler::new(Arc::clone(&coordinator));
        let inbound = bus.subscribe(handler.message_types()).await;
        tasks.push(
            PartitionedConsumer::new(handler, orders_store.clone(), config.consumer)
                .spawn(inbound, shutdown_rx.clone()),
        );

        let orders_dispatcher = OutboxDispatcher::new(
            "orders",
            orders_store,
            bus.clone(),
            config.dispatcher.clone(),
        );
        tasks.push(tokio::spawn(orders_dispatcher.run(shutdown_rx.clone())));

        let payments_dispatcher =
            OutboxDispatcher::new("payments", ledger.clone(), bus.clone(), config.dispatcher);
        tasks.push(tokio::spawn(payments_dispatcher.run(shutdown_rx)));

        tracing::info!(backend, "saga runtime started");

        let state = Arc::new(AppState {
            coordinator,
            payments: PaymentProcessor::new(ledger),
            subscriptions,
            backend,
        });

        Self {
            state,
            bus,
            shutdown,
            tasks,
        }
    }

    /// Returns the state shared with the HTTP handlers.
    pub fn state(&self) -> Arc<AppState<O, L>> {
        Arc::clone(&self.state)
    }

    /// Returns the bus both services publish to.
    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    /// Stops the dispatchers and consumers and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "saga task panicked");
            }
        }
        tracing::info!("saga runtime stopped");
    }
}
