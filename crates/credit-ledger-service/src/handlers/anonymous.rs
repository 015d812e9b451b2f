//! Anonymous free-generation quota handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::GenerationType;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::ledger::FreeGenerationCheck;
use crate::state::AppState;

/// Quota check request.
#[derive(Debug, Deserialize)]
pub struct FreeCheckRequest {
    /// Caller IP, as seen by the product's edge.
    pub ip_address: String,
    /// What the caller wants to generate.
    pub generation_type: GenerationType,
}

/// Check whether an anonymous caller may generate.
pub async fn check_free_generation(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<FreeCheckRequest>,
) -> Result<Json<FreeGenerationCheck>, ApiError> {
    if body.ip_address.trim().is_empty() {
        return Err(ApiError::BadRequest("ip_address is required".into()));
    }

    let check = state
        .ledger
        .check_free_generation(&body.ip_address, body.generation_type)
        .await?;
    Ok(Json(check))
}

/// Quota record request.
#[derive(Debug, Deserialize)]
pub struct FreeRecordRequest {
    /// Caller IP.
    pub ip_address: String,
    /// Optional device fingerprint.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// What was generated.
    pub generation_type: GenerationType,
}

/// Record one successful anonymous generation.
pub async fn record_free_generation(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<FreeRecordRequest>,
) -> Result<StatusCode, ApiError> {
    if body.ip_address.trim().is_empty() {
        return Err(ApiError::BadRequest("ip_address is required".into()));
    }

    state
        .ledger
        .record_free_generation(&body.ip_address, body.fingerprint, body.generation_type)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
