//! Request and response types for the ledger client.

use serde::{Deserialize, Serialize};

use credit_ledger_core::{AccountId, GenerationType, Plan};

/// Affordability check or deduction request.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRequest {
    /// Account to charge.
    pub account_id: AccountId,
    /// Feature identifier.
    pub feature: String,
    /// Duration for tiered features.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
}

/// Affordability check response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckResponse {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Credits the action costs.
    pub cost: i64,
    /// Current balance.
    pub balance: i64,
}

/// Deduction response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeductResponse {
    /// Always `true`; refusals surface as [`crate::ClientError::InsufficientBalance`].
    pub success: bool,
    /// Balance after the deduction.
    pub new_balance: i64,
    /// Credits charged.
    pub cost: i64,
    /// The debit row, absent for free features and admin accounts.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Anonymous quota check request.
#[derive(Debug, Clone, Serialize)]
pub struct FreeCheckRequest {
    /// Caller IP.
    pub ip_address: String,
    /// What the caller wants to generate.
    pub generation_type: GenerationType,
}

/// Anonymous quota record request.
#[derive(Debug, Clone, Serialize)]
pub struct FreeRecordRequest {
    /// Caller IP.
    pub ip_address: String,
    /// Optional device fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// What was generated.
    pub generation_type: GenerationType,
}

/// Anonymous quota check response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FreeCheckResponse {
    /// Whether the generation may proceed.
    pub allowed: bool,
    /// Free generations used this month.
    pub used: u64,
    /// Monthly limit.
    pub limit: u32,
    /// `requires_account` or `limit_reached` when refused.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Balance response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BalanceResponse {
    /// Current balance.
    pub balance: i64,
    /// Credits restored at each monthly rollover.
    pub monthly_allowance: i64,
    /// Current plan.
    pub plan: Plan,
}

/// API error response format.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
