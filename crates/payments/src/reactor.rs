//! Payment side of the saga: reacts to `OrderCreated`.

use async_trait::async_trait;
use common::{IntegrationEvent, ORDER_CREATED};
use messaging::{Envelope, HandleOutcome, HandlerError, InboxReceipt, MessageHandler};

use crate::account::WithdrawOutcome;
use crate::error::LedgerError;
use crate::processor::record_withdrawal;
use crate::store::{LedgerStore, Settlement};

/// Inbox consumer id of the reactor.
pub const CONSUMER_ID: &str = "payments.order-created";

/// Withdraws the order total and answers with `PaymentCompleted` or
/// `PaymentFailed`.
///
/// The inbox row, the withdrawal and the outgoing message are one unit of
/// the store, so a redelivered `OrderCreated` never withdraws twice.
#[derive(Clone)]
pub struct PaymentSagaReactor<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> PaymentSagaReactor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

fn handler_error(e: LedgerError) -> HandlerError {
    if e.is_transient() {
        HandlerError::Transient(e.to_string())
    } else {
        HandlerError::Poison(e.to_string())
    }
}

#[async_trait]
impl<S: LedgerStore> MessageHandler for PaymentSagaReactor<S> {
    fn consumer_id(&self) -> &str {
        CONSUMER_ID
    }

    fn message_types(&self) -> &[&'static str] {
        &[ORDER_CREATED]
    }

    #[tracing::instrument(skip(self, envelope), fields(message_id = %envelope.message_id))]
    async fn handle(&self, envelope: &Envelope) -> Result<HandleOutcome, HandlerError> {
        let event: IntegrationEvent = envelope
            .decode()
            .map_err(|e| HandlerError::Poison(format!("undecodable payload: {e}")))?;
        let order = match event {
            IntegrationEvent::OrderCreated(order) => order,
            other => {
                return Err(HandlerError::Poison(format!(
                    "unexpected {} on {CONSUMER_ID}",
                    other.message_type()
                )));
            }
        };

        let receipt = InboxReceipt::for_envelope(envelope, CONSUMER_ID);
        let settlement = self
            .store
            .settle_order_payment(&receipt, &order)
            .await
            .map_err(handler_error)?;

        match settlement {
            Settlement::Duplicate => {
                tracing::debug!(order_id = %order.order_id, "OrderCreated already settled");
                return Ok(HandleOutcome::Duplicate);
            }
            Settlement::Completed => {
                record_withdrawal(&WithdrawOutcome::succeeded());
                tracing::info!(
                    order_id = %order.order_id,
                    user_id = %order.user_id,
                    amount = %order.total_amount,
                    "payment completed"
                );
            }
            Settlement::Failed(reason) => {
                record_withdrawal(&WithdrawOutcome::rejected(reason));
                tracing::info!(
                    order_id = %order.order_id,
                    user_id = %order.user_id,
                    %reason,
                    "payment failed"
                );
            }
        }
        Ok(HandleOutcome::Processed)
    }
}
