//! Service configuration.

use std::path::Path;

use chrono_tz::Tz;

use credit_ledger_core::{AccountId, LedgerConfig, LedgerError};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection URL. When set the service uses `PgStore`.
    pub database_url: Option<String>,

    /// Path to `RocksDB` data directory (default: "/data/credit-ledger").
    pub data_dir: String,

    /// HS256 secret shared with the identity provider.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer (default: "identity").
    pub auth_issuer: String,

    /// Expected JWT audience (default: "credit-ledger").
    pub auth_audience: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// API key for the admin routes.
    pub admin_api_key: Option<String>,

    /// Accounts opened with the admin balance bypass.
    pub admin_account_ids: Vec<AccountId>,

    /// HMAC secret for the payment webhook.
    pub payment_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Cost table, plans, quota and calendar settings.
    pub ledger: LedgerConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the optional pricing file.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if `LEDGER_TIMEZONE` is not an IANA
    /// zone name or `PRICING_FILE` cannot be read or parsed.
    pub fn from_env() -> Result<Self, LedgerError> {
        let mut ledger = match std::env::var("PRICING_FILE") {
            Ok(path) => {
                let config = load_json_file::<LedgerConfig>(&path)?;
                tracing::info!(path = %path, "Loaded pricing from file");
                config
            }
            Err(_) => LedgerConfig::default(),
        };

        if let Ok(tz) = std::env::var("LEDGER_TIMEZONE") {
            ledger.timezone = tz.parse::<Tz>().map_err(|e| {
                LedgerError::Configuration(format!("invalid LEDGER_TIMEZONE '{tz}': {e}"))
            })?;
        }

        let admin_account_ids = std::env::var("ADMIN_ACCOUNT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<AccountId>().map_err(|e| {
                    LedgerError::Configuration(format!("invalid ADMIN_ACCOUNT_IDS entry '{s}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let defaults = Self::default();
        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            admin_account_ids,
            payment_webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_seconds),
            ledger,
        })
    }

    /// Whether `account_id` is opened with the admin bypass.
    #[must_use]
    pub fn is_admin_account(&self, account_id: &AccountId) -> bool {
        self.admin_account_ids.contains(account_id)
    }
}

/// Load a JSON file into `T`.
fn load_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, LedgerError> {
    let path = Path::new(path);
    let contents = std::fs::read_to_string(path).map_err(|e| {
        LedgerError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| LedgerError::Configuration(format!("cannot parse {}: {e}", path.display())))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            data_dir: "/data/credit-ledger".into(),
            auth_jwt_secret: None,
            auth_issuer: "identity".into(),
            auth_audience: "credit-ledger".into(),
            service_api_key: None,
            admin_api_key: None,
            admin_account_ids: Vec::new(),
            payment_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            ledger: LedgerConfig::default(),
        }
    }
}
