//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, anonymous, credits, health, usage, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for the service-to-service usage and quota endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (user JWT)
/// - `POST /v1/accounts` - Open an account
/// - `GET /v1/accounts/me` - Current user's account
///
/// ## Credits (user JWT)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/history` - Transaction history
/// - `POST /v1/credits/redeem` - Redeem a promo code
///
/// ## Usage and anonymous quota (service API key)
/// - `POST /v1/usage/check` - Affordability check
/// - `POST /v1/usage/deduct` - Deduct after a successful generation
/// - `POST /v1/anonymous/check` - Free-generation quota check
/// - `POST /v1/anonymous/record` - Record a free generation
///
/// ## Admin (admin API key)
/// - `POST /v1/admin/credits` - Manual credit grant
/// - `POST /v1/admin/promo-codes` - Create a promo code
/// - `PATCH /v1/admin/promo-codes/:code` - Activate or deactivate a promo code
/// - `PUT /v1/admin/accounts/:account_id/plan` - Change plan
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments` - Credit pack fulfilment
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let service_routes = Router::new()
        .route("/usage/check", post(usage::check_credits))
        .route("/usage/deduct", post(usage::deduct_credits))
        .route("/anonymous/check", post(anonymous::check_free_generation))
        .route("/anonymous/record", post(anonymous::record_free_generation))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/history", get(credits::get_history))
        .route("/credits/redeem", post(credits::redeem_promo_code))
        // Admin
        .route("/admin/credits", post(admin::add_credits))
        .route("/admin/promo-codes", post(admin::create_promo_code))
        .route("/admin/promo-codes/:code", patch(admin::update_promo_code))
        .route("/admin/accounts/:account_id/plan", put(admin::change_plan))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .merge(service_routes);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
