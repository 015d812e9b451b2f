//! Error types for the credit ledger.
//!
//! Expected business outcomes (insufficient balance, a rejected promo code, an
//! anonymous caller asking for video) are returned as values. The variants
//! here are reserved for conditions the caller cannot treat as a normal answer.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// No promo code matches.
    #[error("promo code not found: {code}")]
    PromoCodeNotFound {
        /// The code that was looked up.
        code: String,
    },

    /// Account already exists.
    #[error("account already exists: {account_id}")]
    AccountAlreadyExists {
        /// The account ID that already exists.
        account_id: String,
    },

    /// A credit amount that must be positive was not.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A promo code catalog entry failed validation or collided with an existing code.
    #[error("invalid promo code: {0}")]
    InvalidPromoCode(String),

    /// A unique external reference (e.g. a payment ID) was already applied.
    #[error("duplicate reference: {reference}")]
    DuplicateReference {
        /// The reference that was replayed.
        reference: String,
    },

    /// Unknown credit pack identifier.
    #[error("unknown credit pack: {0}")]
    UnknownPack(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The backing store failed; nothing was applied.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}
