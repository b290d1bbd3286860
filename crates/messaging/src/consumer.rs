//! Partitioned, retrying message consumer.
//!
//! Envelopes are routed to one of a fixed number of lanes by partition key.
//! Each lane handles its messages one at a time, so messages for one
//! aggregate are applied in arrival order while different aggregates proceed
//! concurrently.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{DeadLetter, DeadLetterStore, Envelope};

/// What a handler did with a message it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The message was applied.
    Processed,
    /// The inbox already held the message; nothing was applied.
    Duplicate,
    /// The message was acknowledged without effect (e.g. an anomaly or a
    /// no-op transition).
    Ignored,
}

/// Why a handler could not accept a message.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Infrastructure trouble. The same message may succeed later.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The message can never be handled, e.g. an undecodable payload.
    #[error("Poison message: {0}")]
    Poison(String),
}

impl HandlerError {
    /// Returns true for errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// A consumer of one or more message types.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable identifier used as the inbox consumer id.
    fn consumer_id(&self) -> &str;

    /// Message types this handler subscribes to.
    fn message_types(&self) -> &[&'static str];

    /// Handles one message.
    ///
    /// Must be idempotent per `envelope.message_id`.
    async fn handle(&self, envelope: &Envelope) -> Result<HandleOutcome, HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn consumer_id(&self) -> &str {
        (**self).consumer_id()
    }

    fn message_types(&self) -> &[&'static str] {
        (**self).message_types()
    }

    async fn handle(&self, envelope: &Envelope) -> Result<HandleOutcome, HandlerError> {
        (**self).handle(envelope).await
    }
}

/// Exponential retry schedule for transient handler errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `None` retries until shutdown.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns true if another attempt may follow attempt number `attempt`.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of sequential lanes.
    pub lanes: usize,
    /// Buffered messages per lane.
    pub lane_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            lane_capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// Final result of consuming one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Handled(HandleOutcome),
    DeadLettered { reason: String },
    /// Shutdown arrived while a transient failure was being retried. The
    /// message is neither applied nor dead-lettered.
    Abandoned { reason: String },
}

/// Drives a [`MessageHandler`] with retries, dead-lettering and lanes.
pub struct PartitionedConsumer<H, D> {
    handler: Arc<H>,
    dead_letters: Arc<D>,
    config: ConsumerConfig,
}

impl<H, D> Clone for PartitionedConsumer<H, D> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            dead_letters: Arc::clone(&self.dead_letters),
            config: self.config.clone(),
        }
    }
}

impl<H, D> PartitionedConsumer<H, D>
where
    H: MessageHandler + 'static,
    D: DeadLetterStore + 'static,
{
    pub fn new(handler: H, dead_letters: D, config: ConsumerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            dead_letters: Arc::new(dead_letters),
            config,
        }
    }

    /// Returns the wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Lane index for a partition key.
    pub fn lane_for(&self, partition_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        (hasher.finish() % self.config.lanes.max(1) as u64) as usize
    }

    /// Handles one message to completion.
    ///
    /// Transient failures are retried with capped backoff until they succeed,
    /// the policy runs out of attempts, or `shutdown` flips to true. Poison
    /// and exhausted messages are dead-lettered.
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            consumer = %self.handler.consumer_id(),
            message_id = %envelope.message_id,
            message_type = %envelope.message_type
        )
    )]
    pub async fn process(
        &self,
        envelope: &Envelope,
        shutdown: &watch::Receiver<bool>,
    ) -> ConsumeOutcome {
        let policy = &self.config.retry;
        let mut shutdown = shutdown.clone();
        let mut attempt: u32 = 1;

        loop {
            match self.handler.handle(envelope).await {
                Ok(outcome) => {
                    if outcome == HandleOutcome::Duplicate {
                        metrics::counter!("inbox_duplicates_total").increment(1);
                        tracing::debug!("duplicate delivery acknowledged");
                    }
                    return ConsumeOutcome::Handled(outcome);
                }
                Err(HandlerError::Transient(reason)) if policy.allows_retry(attempt) => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(attempt, ?delay, %reason, "handler failed, retrying");
                    if !backoff(delay, &mut shutdown).await {
                        tracing::warn!(attempt, %reason, "shutdown during retry, message abandoned");
                        return ConsumeOutcome::Abandoned { reason };
                    }
                    attempt += 1;
                }
                Err(e) => return self.dead_letter(envelope, e.to_string(), attempt).await,
            }
        }
    }

    async fn dead_letter(&self, envelope: &Envelope, reason: String, attempts: u32) -> ConsumeOutcome {
        tracing::error!(attempts, %reason, "moving message to dead letters");
        metrics::counter!("consumer_dead_letters_total").increment(1);

        let letter = DeadLetter::new(envelope, self.handler.consumer_id(), reason.clone(), attempts);
        if let Err(e) = self.dead_letters.dead_letter(letter).await {
            tracing::error!(error = %e, "failed to store dead letter");
        }
        ConsumeOutcome::DeadLettered { reason }
    }

    /// Spawns the lane workers and a router reading from `receiver`.
    ///
    /// The router stops when `shutdown` flips to true or the receiver closes;
    /// lanes finish the messages already buffered and then exit.
    pub fn spawn(
        self,
        mut receiver: mpsc::UnboundedReceiver<Envelope>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let lanes = self.config.lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let (tx, mut rx) = mpsc::channel::<Envelope>(self.config.lane_capacity.max(1));
            senders.push(tx);
            let consumer = self.clone();
            let lane_shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    consumer.process(&envelope, &lane_shutdown).await;
                }
                tracing::debug!(lane, "consumer lane stopped");
            }));
        }

        tokio::spawn(async move {
            tracing::info!(consumer = %self.handler.consumer_id(), lanes, "consumer started");
            loop {
                tokio::select! {
                    received = receiver.recv() => {
                        let Some(envelope) = received else { break };
                        let lane = self.lane_for(&envelope.partition_key);
                        if senders[lane].send(envelope).await.is_err() {
                            tracing::error!(lane, "consumer lane closed unexpectedly");
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            drop(senders);
            for worker in workers {
                let _ = worker.await;
            }
            tracing::info!(consumer = %self.handler.consumer_id(), "consumer stopped");
        })
    }
}

/// Sleeps for `delay`. Returns false if shutdown was requested first.
async fn backoff(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let stop = async {
        // A dropped sender can never request shutdown.
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = stop => false,
    }
}
