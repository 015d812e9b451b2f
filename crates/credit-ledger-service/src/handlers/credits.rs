//! Balance, history and promo redemption handlers for signed-in users.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{CreditTransaction, Plan};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::RedeemOutcome;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Current balance.
    pub balance: i64,
    /// Credits restored at each monthly rollover.
    pub monthly_allowance: i64,
    /// Current plan.
    pub plan: Plan,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.ledger.get_account(&auth.account_id).await?;

    Ok(Json(BalanceResponse {
        balance: account.balance,
        monthly_allowance: account.monthly_allowance,
        plan: account.plan,
    }))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 1-based page (default: 1).
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size (default: 20, max 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Positive = credit, negative = debit.
    pub amount: i64,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Transaction type.
    pub transaction_type: String,
    /// Feature or reason.
    pub feature: String,
    /// Description.
    pub description: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            balance_after: tx.balance_after,
            transaction_type: tx.transaction_type.as_str().to_string(),
            feature: tx.feature.clone(),
            description: tx.description.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// History response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Total transactions on the account.
    pub total: u64,
    /// Page returned.
    pub page: u32,
    /// Effective page size.
    pub page_size: u32,
}

/// List transaction history.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state
        .ledger
        .get_history(&auth.account_id, query.page, query.page_size)
        .await?;

    Ok(Json(HistoryResponse {
        transactions: history
            .transactions
            .iter()
            .map(TransactionResponse::from)
            .collect(),
        total: history.total,
        page: history.page,
        page_size: history.page_size,
    }))
}

/// Promo redemption request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// The code as typed by the user.
    pub code: String,
}

/// Redeem a promo code.
pub async fn redeem_promo_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemOutcome>, ApiError> {
    let outcome = state
        .ledger
        .redeem_promo_code(&auth.account_id, &body.code)
        .await?;

    match outcome.error {
        Some(error) => Err(ApiError::PromoRejected(error)),
        None => Ok(Json(outcome)),
    }
}
