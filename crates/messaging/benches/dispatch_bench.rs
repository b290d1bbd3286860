use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IntegrationEvent, MessageId, OrderId};
use criterion::{Criterion, criterion_group, criterion_main};
use messaging::{
    DispatcherConfig, InMemoryBus, MessageTransport, OutboxDispatcher, OutboxMessage, OutboxStore,
    OutboxTable, Result,
};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct BenchOutbox {
    table: Arc<Mutex<OutboxTable>>,
}

impl BenchOutbox {
    async fn fill(&self, orders: usize, per_order: usize) {
        let mut table = self.table.lock().await;
        for _ in 0..orders {
            let order_id = OrderId::new();
            for _ in 0..per_order {
                let event = IntegrationEvent::payment_completed(order_id);
                table.push(OutboxMessage::for_event(&event).unwrap());
            }
        }
    }
}

#[async_trait]
impl OutboxStore for BenchOutbox {
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        Ok(self.table.lock().await.unsent(limit))
    }

    async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> Result<bool> {
        self.table.lock().await.mark_sent(id, sent_at)
    }

    async fn record_failure(&self, id: MessageId, error: &str) -> Result<()> {
        self.table.lock().await.record_failure(id, error)
    }

    async fn list_outbox(&self) -> Result<Vec<OutboxMessage>> {
        Ok(self.table.lock().await.all().to_vec())
    }
}

fn bench_run_once_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatcher/run_once_100_messages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = BenchOutbox::default();
                store.fill(20, 5).await;
                let dispatcher = OutboxDispatcher::new(
                    "bench",
                    store,
                    InMemoryBus::new(),
                    DispatcherConfig::default(),
                );
                let report = dispatcher.run_once().await.unwrap();
                assert_eq!(report.published, 100);
            });
        });
    });
}

fn bench_run_once_failing_transport(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatcher/run_once_failing_transport", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = BenchOutbox::default();
                store.fill(20, 5).await;
                let bus = InMemoryBus::new();
                bus.set_fail_on_publish(true).await;
                let dispatcher =
                    OutboxDispatcher::new("bench", store, bus, DispatcherConfig::default());
                let report = dispatcher.run_once().await.unwrap();
                assert_eq!(report.failed, 20);
                assert_eq!(report.skipped, 80);
            });
        });
    });
}

fn bench_bus_publish_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = InMemoryBus::new();
    let receivers = rt.block_on(async {
        let mut receivers = Vec::new();
        for _ in 0..4 {
            receivers.push(bus.subscribe(&[common::PAYMENT_COMPLETED]).await);
        }
        receivers
    });
    let message =
        OutboxMessage::for_event(&IntegrationEvent::payment_completed(OrderId::new())).unwrap();
    let envelope = message.to_envelope();

    c.bench_function("bus/publish_fan_out_4", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.publish(&envelope).await.unwrap();
            });
        });
    });

    drop(receivers);
}

criterion_group!(
    benches,
    bench_run_once_100,
    bench_run_once_failing_transport,
    bench_bus_publish_fan_out,
);
criterion_main!(benches);
