//! Billable-action handlers called by the generation product's backend.
//!
//! The caller checks before generating and deducts after the generation
//! succeeds; nothing is reserved in between.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::AccountId;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::ledger::{CheckOutcome, DeductOutcome};
use crate::state::AppState;

/// Affordability check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Account to charge.
    pub account_id: AccountId,
    /// Feature identifier (`image`, `video`, ...).
    pub feature: String,
    /// Duration for tiered features.
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// Check whether the account can pay for a feature.
pub async fn check_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckOutcome>, ApiError> {
    tracing::debug!(
        service = %service.service_name,
        account_id = %body.account_id,
        feature = %body.feature,
        "Credit check"
    );

    let outcome = state
        .ledger
        .check_credits(&body.account_id, &body.feature, body.duration_seconds)
        .await?;
    Ok(Json(outcome))
}

/// Deduction request.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Account to charge.
    pub account_id: AccountId,
    /// Feature identifier.
    pub feature: String,
    /// Duration for tiered features.
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    /// Optional log description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Deduct credits after a successful generation.
///
/// Responds `402 Payment Required` when the balance no longer covers the cost.
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<DeductRequest>,
) -> Result<Json<DeductOutcome>, ApiError> {
    let outcome = state
        .ledger
        .deduct_credits(
            &body.account_id,
            &body.feature,
            body.duration_seconds,
            body.description.as_deref(),
        )
        .await?;

    if !outcome.success {
        tracing::debug!(
            service = %service.service_name,
            account_id = %body.account_id,
            balance = outcome.new_balance,
            required = outcome.cost,
            "Deduction refused"
        );
        return Err(ApiError::InsufficientBalance {
            balance: outcome.new_balance,
            required: outcome.cost,
        });
    }

    Ok(Json(outcome))
}
