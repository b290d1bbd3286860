//! Consumer of payment outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use common::{IntegrationEvent, PAYMENT_COMPLETED, PAYMENT_FAILED};
use messaging::{Envelope, HandleOutcome, HandlerError, InboxReceipt, MessageHandler};

use crate::catalog::ProductCatalog;
use crate::coordinator::OrderSagaCoordinator;
use crate::error::OrderError;
use crate::notifications::StatusNotifier;
use crate::state::OrderStatus;
use crate::store::{OrderStore, OutcomeApplied};

/// Inbox consumer id of the handler.
pub const CONSUMER_ID: &str = "orders.payment-outcome";

/// Feeds `PaymentCompleted` and `PaymentFailed` into the coordinator.
pub struct PaymentOutcomeHandler<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    coordinator: Arc<OrderSagaCoordinator<S, C, N>>,
}

impl<S, C, N> PaymentOutcomeHandler<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    pub fn new(coordinator: Arc<OrderSagaCoordinator<S, C, N>>) -> Self {
        Self { coordinator }
    }
}

impl<S, C, N> Clone for PaymentOutcomeHandler<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

fn handler_error(e: OrderError) -> HandlerError {
    if e.is_transient() {
        HandlerError::Transient(e.to_string())
    } else {
        HandlerError::Poison(e.to_string())
    }
}

#[async_trait]
impl<S, C, N> MessageHandler for PaymentOutcomeHandler<S, C, N>
where
    S: OrderStore,
    C: ProductCatalog,
    N: StatusNotifier,
{
    fn consumer_id(&self) -> &str {
        CONSUMER_ID
    }

    fn message_types(&self) -> &[&'static str] {
        &[PAYMENT_COMPLETED, PAYMENT_FAILED]
    }

    #[tracing::instrument(skip(self, envelope), fields(message_id = %envelope.message_id))]
    async fn handle(&self, envelope: &Envelope) -> Result<HandleOutcome, HandlerError> {
        let event: IntegrationEvent = envelope
            .decode()
            .map_err(|e| HandlerError::Poison(format!("undecodable payload: {e}")))?;
        let (order_id, target) = match event {
            IntegrationEvent::PaymentCompleted(data) => (data.order_id, OrderStatus::Paid),
            IntegrationEvent::PaymentFailed(data) => (data.order_id, OrderStatus::Failed),
            other => {
                return Err(HandlerError::Poison(format!(
                    "unexpected {} on {CONSUMER_ID}",
                    other.message_type()
                )));
            }
        };

        let receipt = InboxReceipt::for_envelope(envelope, CONSUMER_ID);
        let applied = self
            .coordinator
            .apply_payment_outcome(&receipt, order_id, target)
            .await
            .map_err(handler_error)?;

        Ok(match applied {
            OutcomeApplied::Duplicate => HandleOutcome::Duplicate,
            OutcomeApplied::OrderMissing | OutcomeApplied::AlreadyTerminal(_) => {
                HandleOutcome::Ignored
            }
            OutcomeApplied::Transitioned(_) => HandleOutcome::Processed,
        })
    }
}
