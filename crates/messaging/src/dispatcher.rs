//! Outbox dispatcher: drains unsent messages to the transport.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Notify, watch};

use crate::transport::MessageTransport;
use crate::{OutboxStore, Result};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of messages fetched per cycle.
    pub batch_size: usize,
    /// Delay between cycles when nothing failed.
    pub poll_interval: Duration,
    /// First delay after a failed cycle; doubles per consecutive failure.
    pub base_backoff: Duration,
    /// Upper bound for the backoff delay.
    pub max_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Returns the backoff delay after `failures` consecutive failed cycles.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages published and marked sent by this cycle.
    pub published: usize,
    /// Messages whose publish failed; they stay unsent.
    pub failed: usize,
    /// Messages held back because an earlier message of the same aggregate failed.
    pub skipped: usize,
    /// Messages published but already marked sent by someone else.
    pub already_sent: usize,
}

impl DispatchReport {
    /// Returns true if the cycle did not fetch anything.
    pub fn is_idle(&self) -> bool {
        self.published + self.failed + self.skipped + self.already_sent == 0
    }
}

/// Publishes outbox messages and marks them sent.
///
/// Runs independently of the request path. Publishing happens with no store
/// lock held; the mark step is a compare-and-set, so two dispatchers racing
/// on one outbox publish a message at most twice and mark it exactly once.
pub struct OutboxDispatcher<S, T> {
    name: String,
    store: S,
    transport: T,
    config: DispatcherConfig,
}

impl<S, T> OutboxDispatcher<S, T>
where
    S: OutboxStore,
    T: MessageTransport,
{
    /// Creates a dispatcher for one service's outbox.
    pub fn new(name: impl Into<String>, store: S, transport: T, config: DispatcherConfig) -> Self {
        Self {
            name: name.into(),
            store,
            transport,
            config,
        }
    }

    /// Returns the dispatcher's configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Runs a single dispatch cycle.
    #[tracing::instrument(skip(self), fields(dispatcher = %self.name))]
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let started = Instant::now();
        let batch = self.store.fetch_unsent(self.config.batch_size).await?;
        let mut report = DispatchReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for message in batch {
            if blocked.contains(&message.aggregate_id) {
                report.skipped += 1;
                continue;
            }

            match self.transport.publish(&message.to_envelope()).await {
                Ok(()) => {
                    if self.store.mark_sent(message.id, Utc::now()).await? {
                        report.published += 1;
                        metrics::counter!("outbox_messages_published_total").increment(1);
                        tracing::debug!(
                            message_id = %message.id,
                            message_type = %message.message_type,
                            "outbox message published"
                        );
                    } else {
                        report.already_sent += 1;
                        tracing::debug!(message_id = %message.id, "outbox message already marked sent");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        message_type = %message.message_type,
                        attempts = message.attempts + 1,
                        error = %e,
                        "outbox publish failed"
                    );
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    self.store.record_failure(message.id, &e.to_string()).await?;
                    blocked.insert(message.aggregate_id);
                    report.failed += 1;
                }
            }
        }

        metrics::histogram!("outbox_dispatch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Runs dispatch cycles until `shutdown` flips to true.
    ///
    /// A cycle starts on the poll interval, on the store's wake signal, or
    /// immediately after a full batch. Failed cycles back off exponentially
    /// and ignore the wake signal until a cycle succeeds.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let wake = self.store.wake_signal();
        let mut failures: u32 = 0;
        tracing::info!(dispatcher = %self.name, "outbox dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(report) if report.failed == 0 => {
                    failures = 0;
                    if report.published + report.already_sent >= self.config.batch_size {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Ok(_) => {
                    failures += 1;
                    self.config.backoff_for(failures)
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(dispatcher = %self.name, error = %e, "outbox dispatch cycle failed");
                    self.config.backoff_for(failures)
                }
            };

            let listen = if failures == 0 { wake.clone() } else { None };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for(listen) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(dispatcher = %self.name, "outbox dispatcher stopped");
    }
}

fn wait_for(signal: Option<Arc<Notify>>) -> impl Future<Output = ()> {
    async move {
        match signal {
            Some(notify) => notify.notified().await,
            None => std::future::pending::<()>().await,
        }
    }
}
