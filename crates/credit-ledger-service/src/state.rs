//! Application state.

use std::sync::Arc;

use credit_ledger_store::Store;

use crate::config::ServiceConfig;
use crate::ledger::Ledger;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger all handlers go through.
    pub ledger: Ledger,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Build the state over `store`, using the ledger settings in `config`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        if config.auth_jwt_secret.is_none() {
            tracing::warn!("AUTH_JWT_SECRET not configured - user routes will reject every token");
        }
        if config.payment_webhook_secret.is_none() {
            tracing::warn!("PAYMENT_WEBHOOK_SECRET not configured - payment webhooks are disabled");
        }

        let ledger = Ledger::new(store, config.ledger.clone());
        Self { ledger, config }
    }

    /// Build the state around an existing ledger.
    #[must_use]
    pub fn with_ledger(ledger: Ledger, config: ServiceConfig) -> Self {
        Self { ledger, config }
    }
}
