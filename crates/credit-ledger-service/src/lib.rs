//! Credit ledger orchestrator and HTTP API.
//!
//! [`Ledger`] owns the business rules: monthly rollover, cost resolution,
//! admin bypass, promo redemption and the anonymous quota. The HTTP layer in
//! [`routes`] is a thin wrapper that authenticates callers and maps outcomes
//! to status codes.
//!
//! # Authentication
//!
//! 1. **User JWTs** (HS256, issued by the identity provider) for the account,
//!    balance, history and redemption routes.
//! 2. **Service API key** (`x-api-key`) for the usage and anonymous quota routes
//!    called by the generation backend.
//! 3. **Admin API key** (`x-admin-key`) for grants, promo codes and plan changes.
//! 4. **HMAC signature** (`x-signature`) on the payment webhook.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::{
    CheckOutcome, CreditOutcome, DeductOutcome, FreeGenerationCheck, FreeGenerationDenial,
    History, Ledger, RedeemOutcome, MAX_PAGE_SIZE,
};
pub use routes::create_router;
pub use state::AppState;
