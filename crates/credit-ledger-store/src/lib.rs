//! Storage layer for the credit ledger.
//!
//! Every balance mutation is one atomic operation against the backend: a
//! conditional decrement for debits, an increment for credits and a
//! compare-and-set on `reset_at` for the monthly rollover. The transaction log
//! row is written in the same unit of work and carries the balance that write
//! produced.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, safe across any number of processes.
//! - [`MemoryStore`]: one mutex around all state; for tests and local runs.
//! - `RocksStore` (feature `rocksdb-backend`): embedded single-node store with
//!   column families per entity and CBOR values.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use credit_ledger_core::{Account, AccountId, NewTransaction, Plan};
//! use credit_ledger_store::{MemoryStore, Store};
//!
//! # async fn example() -> credit_ledger_store::Result<()> {
//! let store = MemoryStore::new();
//! let account = Account::open(AccountId::generate(), Plan::Free, 15, 0, false, Utc::now());
//! store.insert_account(&account, Vec::new()).await?;
//!
//! let debit = NewTransaction::debit(account.account_id, 1, "image", "Image", Utc::now());
//! let applied = store.debit(debit).await?;
//! assert_eq!(applied.map(|tx| tx.balance_after), Some(14));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credit_ledger_core::{
    Account, AccountId, AnonymousQuotaEntry, CreditTransaction, NewTransaction, Plan, PromoCode,
    PromoRedemption,
};

/// Result of the atomic promo redemption write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemWrite {
    /// Redemption row inserted, cap incremented and credits added.
    Redeemed(CreditTransaction),
    /// The account already holds a redemption row.
    AlreadyRedeemed,
    /// The capped increment of `used_count` found no room.
    UsageCapReached,
}

/// The storage trait defining all ledger persistence.
///
/// Implementations must make each mutating method a single atomic unit: either
/// the balance change and its log row are both visible, or neither is.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account together with its opening transactions.
    ///
    /// The `opening` rows are finished in order so the last one carries the
    /// account's opening balance. See [`finish_opening`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account exists.
    async fn insert_account(
        &self,
        account: &Account,
        opening: Vec<NewTransaction>,
    ) -> Result<Vec<CreditTransaction>>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Change an account's plan and monthly allowance. The balance is untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn set_plan(
        &self,
        account_id: &AccountId,
        plan: Plan,
        monthly_allowance: i64,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    // =========================================================================
    // Balance Mutations
    // =========================================================================

    /// Subtract `-tx.amount` from the balance only if the balance covers it.
    ///
    /// Returns `None` when the balance was too low at write time; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn debit(&self, tx: NewTransaction) -> Result<Option<CreditTransaction>>;

    /// Add `tx.amount` to the balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::DuplicateReference` if `tx.reference` was already used.
    /// - `StoreError::BalanceOverflow` if the new balance does not fit in an `i64`.
    async fn credit(&self, tx: NewTransaction) -> Result<CreditTransaction>;

    /// Set the balance to `tx.amount` and `reset_at` to `tx.created_at`, but only
    /// while `reset_at` still equals `expected_reset_at`.
    ///
    /// Returns `None` when another caller reset the account first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn reset_balance(
        &self,
        expected_reset_at: Option<DateTime<Utc>>,
        tx: NewTransaction,
    ) -> Result<Option<CreditTransaction>>;

    // =========================================================================
    // Transaction Log
    // =========================================================================

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    /// Count an account's transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn count_transactions(&self, account_id: &AccountId) -> Result<u64>;

    // =========================================================================
    // Promo Codes
    // =========================================================================

    /// Add a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a code with the same
    /// case-insensitive spelling exists.
    async fn insert_promo_code(&self, code: &PromoCode) -> Result<()>;

    /// Switch a code on or off.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no code matches.
    async fn set_promo_active(&self, code: &str, is_active: bool) -> Result<PromoCode>;

    /// Find a code by case-insensitive match.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>>;

    /// The redemption held by an account, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get_redemption(&self, account_id: &AccountId) -> Result<Option<PromoRedemption>>;

    /// Atomically insert the redemption row, take one use of `code` and credit
    /// `tx.amount` to the account.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account or code doesn't exist.
    /// - `StoreError::BalanceOverflow` if the grant does not fit in the balance.
    async fn redeem_promo(&self, code: &PromoCode, tx: NewTransaction) -> Result<RedeemWrite>;

    // =========================================================================
    // Anonymous Quota
    // =========================================================================

    /// Record one free generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn record_free_generation(&self, entry: &AnonymousQuotaEntry) -> Result<()>;

    /// Count free generations by `ip_address` at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn count_free_generations(&self, ip_address: &str, since: DateTime<Utc>) -> Result<u64>;
}

/// Finish the opening rows of `account` in order.
///
/// Each row's `balance_after` is the running total, ending at the opening
/// balance.
#[must_use]
pub fn finish_opening(account: &Account, opening: Vec<NewTransaction>) -> Vec<CreditTransaction> {
    let logged: i64 = opening.iter().map(|tx| tx.amount).sum();
    let mut balance = account.balance.saturating_sub(logged);
    opening
        .into_iter()
        .map(|tx| {
            balance = balance.saturating_add(tx.amount);
            tx.applied(balance)
        })
        .collect()
}
