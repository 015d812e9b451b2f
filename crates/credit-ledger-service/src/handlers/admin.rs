//! Operator handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::{AccountId, NewPromoCode, Plan, PromoCode, TransactionType};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::accounts::AccountResponse;
use crate::ledger::CreditOutcome;
use crate::state::AppState;

/// Manual credit grant.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Account to credit.
    pub account_id: AccountId,
    /// Credits to add (must be positive).
    pub amount: i64,
    /// Log description.
    #[serde(default)]
    pub description: Option<String>,
    /// `admin_adjust` (default) or `credit_pack`.
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
}

/// Add credits to an account.
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AddCreditsRequest>,
) -> Result<Json<CreditOutcome>, ApiError> {
    let transaction_type = body
        .transaction_type
        .unwrap_or(TransactionType::AdminAdjust);
    if !transaction_type.is_manual_grant() {
        return Err(ApiError::BadRequest(format!(
            "transaction_type must be admin_adjust or credit_pack, got {}",
            transaction_type.as_str()
        )));
    }

    let description = body
        .description
        .unwrap_or_else(|| format!("Manual adjustment by {}", admin.admin_id));
    let outcome = state
        .ledger
        .add_credits(
            &body.account_id,
            body.amount,
            transaction_type,
            transaction_type.as_str(),
            &description,
        )
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %body.account_id,
        amount = body.amount,
        "Admin credit grant"
    );
    Ok(Json(outcome))
}

/// Create a promo code.
pub async fn create_promo_code(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<NewPromoCode>,
) -> Result<(StatusCode, Json<PromoCode>), ApiError> {
    let code = state.ledger.create_promo_code(body).await?;
    tracing::info!(admin_id = %admin.admin_id, code = %code.code, "Promo code created by admin");
    Ok((StatusCode::CREATED, Json(code)))
}

/// Promo code update.
#[derive(Debug, Deserialize)]
pub struct UpdatePromoCodeRequest {
    /// Whether the code can be redeemed.
    pub is_active: bool,
}

/// Switch a promo code on or off.
pub async fn update_promo_code(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
    Json(body): Json<UpdatePromoCodeRequest>,
) -> Result<Json<PromoCode>, ApiError> {
    let promo = state.ledger.set_promo_active(&code, body.is_active).await?;
    tracing::info!(
        admin_id = %admin.admin_id,
        code = %promo.code,
        is_active = promo.is_active,
        "Promo code updated by admin"
    );
    Ok(Json(promo))
}

/// Plan change request.
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    /// The new plan.
    pub plan: Plan,
}

/// Move an account to another plan.
pub async fn change_plan(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<ChangePlanRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account_id = account_id
        .parse::<AccountId>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let account = state.ledger.change_plan(&account_id, body.plan).await?;

    tracing::info!(admin_id = %admin.admin_id, account_id = %account_id, plan = %body.plan, "Plan changed by admin");
    Ok(Json(AccountResponse::from(&account)))
}
