//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: `account_id || seq` to `transaction_id`.
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Per-account transaction counters, keyed by `account_id`.
    pub const TRANSACTION_COUNTS: &str = "transaction_counts";

    /// Applied unique references, keyed by reference, valued by `transaction_id`.
    pub const REFERENCES: &str = "references";

    /// Promo code catalog, keyed by normalized code.
    pub const PROMO_CODES: &str = "promo_codes";

    /// One redemption per account, keyed by `account_id`.
    pub const PROMO_REDEMPTIONS: &str = "promo_redemptions";

    /// Anonymous free generations, keyed by `ip || 0x00 || millis || nonce`.
    pub const ANONYMOUS_QUOTA: &str = "anonymous_quota";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::TRANSACTION_COUNTS,
        cf::REFERENCES,
        cf::PROMO_CODES,
        cf::PROMO_REDEMPTIONS,
        cf::ANONYMOUS_QUOTA,
    ]
}
