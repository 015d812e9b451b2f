//! Payment provider webhook.
//!
//! The provider signs the raw request body with HMAC-SHA256 and sends the hex
//! digest in `x-signature`. A successful payment grants the credits of the
//! purchased pack exactly once per payment ID.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{AccountId, LedgerError};

use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Event type that triggers pack fulfilment.
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

/// Payment webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    /// Event type.
    pub event_type: String,
    /// Provider payment ID, used as the idempotency reference.
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Account that paid.
    #[serde(default)]
    pub account_id: Option<AccountId>,
    /// Purchased pack name.
    #[serde(default)]
    pub pack: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Set when the payment had already been fulfilled.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Handle payment provider webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = &state.config.payment_webhook_secret else {
        tracing::warn!("Payment webhook received but PAYMENT_WEBHOOK_SECRET is not configured");
        return Err(ApiError::Unauthorized);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if !verify_signature(secret, body.as_bytes(), signature) {
        tracing::warn!("Invalid payment webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let event: PaymentEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if event.event_type != PAYMENT_SUCCEEDED {
        tracing::debug!(event_type = %event.event_type, "Unhandled payment event");
        return Ok(Json(WebhookResponse {
            received: true,
            duplicate: false,
        }));
    }

    let (Some(payment_id), Some(account_id), Some(pack)) =
        (event.payment_id, event.account_id, event.pack)
    else {
        return Err(ApiError::BadRequest(
            "payment.succeeded requires payment_id, account_id and pack".into(),
        ));
    };

    match state
        .ledger
        .fulfil_credit_pack(&account_id, &pack, &payment_id)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                account_id = %account_id,
                payment_id = %payment_id,
                pack = %pack,
                new_balance = outcome.new_balance,
                "Credit pack fulfilled"
            );
            Ok(Json(WebhookResponse {
                received: true,
                duplicate: false,
            }))
        }
        Err(LedgerError::DuplicateReference { .. }) => {
            tracing::info!(payment_id = %payment_id, "Payment already fulfilled");
            Ok(Json(WebhookResponse {
                received: true,
                duplicate: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
