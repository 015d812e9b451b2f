//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credit_ledger_core::{LedgerError, PromoError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or reference already applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The balance does not cover the cost.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Cost of the action.
        required: i64,
    },

    /// A promo code was refused.
    #[error("{0}")]
    PromoRejected(PromoError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientBalance { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::PromoRejected(error) => {
                let status = match error {
                    PromoError::AlreadyRedeemed => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, error.code(), error.to_string(), None)
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound { .. } | LedgerError::PromoCodeNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            LedgerError::AccountAlreadyExists { .. } | LedgerError::DuplicateReference { .. } => {
                Self::Conflict(err.to_string())
            }
            LedgerError::InvalidAmount(_)
            | LedgerError::InvalidPromoCode(_)
            | LedgerError::UnknownPack(_)
            | LedgerError::InvalidId(_) => Self::BadRequest(err.to_string()),
            LedgerError::Storage(msg) | LedgerError::Configuration(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_statuses() {
        let cases = [
            (
                LedgerError::AccountNotFound {
                    account_id: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                LedgerError::PromoCodeNotFound { code: "x".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                LedgerError::DuplicateReference {
                    reference: "pay_1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (LedgerError::InvalidAmount("0".into()), StatusCode::BAD_REQUEST),
            (
                LedgerError::Storage("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn insufficient_balance_is_payment_required() {
        let response = ApiError::InsufficientBalance {
            balance: 3,
            required: 10,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn promo_rejections_keep_their_code() {
        let already = ApiError::PromoRejected(PromoError::AlreadyRedeemed).into_response();
        assert_eq!(already.status(), StatusCode::CONFLICT);
        let expired = ApiError::PromoRejected(PromoError::ExpiredCode).into_response();
        assert_eq!(expired.status(), StatusCode::BAD_REQUEST);
    }
}
