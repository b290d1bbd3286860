//! Account endpoints of the payment service.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, UserId};
use orders::OrderStore;
use payments::{Account, LedgerStore, WithdrawOutcome};
use serde::{Deserialize, Serialize};

use super::orders::parse_id;
use crate::error::ApiError;
use crate::runtime::AppState;

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: String,
    #[serde(default)]
    pub initial_balance_cents: i64,
}

#[derive(Deserialize)]
pub struct AmountRequest {
    pub amount_cents: i64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub balance_cents: i64,
    pub initial_balance_cents: i64,
    pub transactions: Vec<TransactionResponse>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub kind: String,
    pub amount_cents: i64,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct WithdrawResponse {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            balance_cents: account.balance.cents(),
            initial_balance_cents: account.initial_balance.cents(),
            transactions: account
                .transactions
                .iter()
                .map(|t| TransactionResponse {
                    id: t.id.to_string(),
                    kind: t.kind.to_string(),
                    amount_cents: t.amount.cents(),
                    reference: t.reference.clone(),
                    timestamp: t.timestamp,
                })
                .collect(),
        }
    }
}

impl From<WithdrawOutcome> for WithdrawResponse {
    fn from(outcome: WithdrawOutcome) -> Self {
        Self {
            ok: outcome.ok,
            reason: outcome.reason.map(|r| r.as_str()),
        }
    }
}

/// POST /accounts: open an account.
#[tracing::instrument(skip(state, req))]
pub async fn create<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let user_id: UserId = parse_id(&req.user_id, "user_id")?;
    let account = state
        .payments
        .create_account(user_id, Money::from_cents(req.initial_balance_cents))
        .await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// POST /accounts/{id}/deposit
#[tracing::instrument(skip(state, req))]
pub async fn deposit<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id: UserId = parse_id(&id, "user id")?;
    let account = state
        .payments
        .deposit(user_id, Money::from_cents(req.amount_cents))
        .await?;
    Ok(Json(AccountResponse::from(&account)))
}

/// POST /accounts/{id}/withdraw: a refused withdrawal is a normal `200`
/// with `ok: false` and the reason.
#[tracing::instrument(skip(state, req))]
pub async fn withdraw<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let user_id: UserId = parse_id(&id, "user id")?;
    let outcome = state
        .payments
        .withdraw(user_id, Money::from_cents(req.amount_cents))
        .await?;
    Ok(Json(WithdrawResponse::from(outcome)))
}

/// GET /accounts/{id}: balance and transaction log.
#[tracing::instrument(skip(state))]
pub async fn get<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id: UserId = parse_id(&id, "user id")?;
    let account = state.payments.get_account(user_id).await?;
    Ok(Json(AccountResponse::from(&account)))
}
