//! Account handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{Account, Plan};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance.
    pub balance: i64,
    /// Credits restored at each monthly rollover.
    pub monthly_allowance: i64,
    /// Current plan.
    pub plan: Plan,
    /// Whether the account bypasses balance checks.
    pub is_admin: bool,
    /// Last rollover.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            balance: account.balance,
            monthly_allowance: account.monthly_allowance,
            plan: account.plan,
            is_admin: account.is_admin,
            reset_at: account.reset_at.map(|at| at.to_rfc3339()),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Starting plan (default: free).
    #[serde(default)]
    pub plan: Option<Plan>,
}

/// Open an account for the authenticated user.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let is_admin = state.config.is_admin_account(&auth.account_id);
    let account = state
        .ledger
        .open_account(auth.account_id, body.plan.unwrap_or(Plan::Free), is_admin)
        .await?;

    Ok(Json(AccountResponse::from(&account)))
}

/// Get the authenticated user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.get_account(&auth.account_id).await?;
    Ok(Json(AccountResponse::from(&account)))
}
