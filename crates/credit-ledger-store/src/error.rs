//! Error types for ledger storage.

use credit_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// A record with the same unique key exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Conflicting key.
        id: String,
    },

    /// A credit would push the balance past `i64::MAX`. Nothing was written.
    #[error("balance overflow on account {account_id}")]
    BalanceOverflow {
        /// The account being credited.
        account_id: String,
    },

    /// A unique transaction reference was already applied.
    #[error("duplicate reference: {reference}")]
    DuplicateReference {
        /// The replayed reference.
        reference: String,
    },
}

impl StoreError {
    pub(crate) fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn balance_overflow(account_id: impl ToString) -> Self {
        Self::BalanceOverflow {
            account_id: account_id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "account", id } => {
                Self::AccountNotFound { account_id: id }
            }
            StoreError::AlreadyExists { entity: "account", id } => {
                Self::AccountAlreadyExists { account_id: id }
            }
            StoreError::AlreadyExists { entity: "promo code", id } => {
                Self::InvalidPromoCode(format!("code already exists: {id}"))
            }
            StoreError::NotFound { entity: "promo code", id } => Self::PromoCodeNotFound { code: id },
            StoreError::BalanceOverflow { account_id } => Self::InvalidAmount(format!(
                "credit would overflow the balance of account {account_id}"
            )),
            StoreError::DuplicateReference { reference } => Self::DuplicateReference { reference },
            other => Self::Storage(other.to_string()),
        }
    }
}
