//! Order endpoints: placing orders, queries and the status stream.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use futures_util::stream::{self, Stream};
use orders::{Order, OrderLine, OrderStore, StatusChanged, Subscription};
use payments::LedgerStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::runtime::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderLineRequest>,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order. Payment happens asynchronously; the order
/// comes back in `PaymentPending`.
#[tracing::instrument(skip(state, req))]
pub async fn create<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id: UserId = parse_id(&req.user_id, "user_id")?;
    let lines = req
        .items
        .into_iter()
        .map(|line| OrderLine::new(line.product_id, line.quantity))
        .collect();

    let order = state.coordinator.create_order(user_id, lines).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}: load one order.
#[tracing::instrument(skip(state))]
pub async fn get<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order id")?;
    let order = state.coordinator.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /users/{id}/orders: a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_by_user<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let user_id: UserId = parse_id(&id, "user id")?;
    let orders = state.coordinator.get_orders_by_user(user_id).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

enum StreamPhase {
    Current(StatusChanged),
    Live,
    Done,
}

fn status_event(change: &StatusChanged) -> Result<Event, axum::Error> {
    Event::default().event("status").json_data(change)
}

/// Streams the current status, then every change, until a terminal status.
fn status_stream(
    current: StatusChanged,
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(
        (StreamPhase::Current(current), subscription),
        |(phase, mut subscription)| async move {
            let change = match phase {
                StreamPhase::Current(current) => current,
                StreamPhase::Live => subscription.recv().await?,
                StreamPhase::Done => return None,
            };
            let next = if change.status.is_terminal() {
                StreamPhase::Done
            } else {
                StreamPhase::Live
            };
            Some((status_event(&change), (next, subscription)))
        },
    )
}

/// GET /orders/{id}/status: Server-Sent Events with the order's status.
///
/// The first event is the status at subscription time. The stream ends after
/// `Paid` or `Failed`, or early if this client falls too far behind.
#[tracing::instrument(skip(state))]
pub async fn status<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order id")?;

    // Subscribe before reading, so a change between the two is not lost.
    let subscription = state.subscriptions.subscribe(order_id);
    let order = state.coordinator.get_order(order_id).await?;
    let current = StatusChanged {
        order_id,
        status: order.status(),
        changed_at: order.updated_at(),
    };

    Ok(Sse::new(status_stream(current, subscription)).keep_alive(KeepAlive::default()))
}

pub(crate) fn parse_id<T>(id: &str, what: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = uuid::Error>,
{
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}
