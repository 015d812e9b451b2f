//! Credit ledger service entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_ledger_service::{create_router, AppState, ServiceConfig};
use credit_ledger_store::{PgStore, Store};

/// Connection pool size for the PostgreSQL backend.
const DATABASE_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting credit ledger service");

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        postgres = config.database_url.is_some(),
        timezone = %config.ledger.timezone,
        free_tier_limit = config.ledger.free_tier_limit,
        admin_accounts = config.admin_account_ids.len(),
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;
    let state = AppState::new(store, config.clone());
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pick the storage backend: PostgreSQL when `DATABASE_URL` is set, then
/// `RocksDB` when compiled in, otherwise the in-memory store.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(url, DATABASE_MAX_CONNECTIONS).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "rocksdb-backend")]
    {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        let store = credit_ledger_store::RocksStore::open(&config.data_dir)?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    {
        tracing::warn!("DATABASE_URL not set - using in-memory store, balances will not survive a restart");
        Ok(Arc::new(credit_ledger_store::MemoryStore::new()))
    }
}
