//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orders::OrderError;
use payments::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order service error.
    Orders(OrderError),
    /// Payment service error.
    Payments(LedgerError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orders(err) => order_error_to_response(err),
            ApiError::Payments(err) => ledger_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    let status = match &err {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::AlreadyTerminal { .. } | OrderError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    let status = match &err {
        LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Orders(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Payments(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId, UserId};

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_order_errors_map_to_status_codes() {
        assert_eq!(status_of(OrderError::NoItems.into()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(OrderError::UnknownProduct(ProductId::new("SKU-404")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(OrderError::OrderNotFound(OrderId::new()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::Unavailable("down".to_string()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_ledger_errors_map_to_status_codes() {
        assert_eq!(
            status_of(LedgerError::InvalidArgument("negative".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(LedgerError::AccountNotFound(UserId::new()).into()),
            StatusCode::NOT_FOUND
        );
    }
}
