//! `RocksDB` storage implementation.
//!
//! Each mutation reads what it needs and commits one `WriteBatch` while holding
//! a process-wide write lock, which makes read-check-write sequences atomic for
//! the single process that owns the database.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use credit_ledger_core::{
    Account, AccountId, AnonymousQuotaEntry, CreditTransaction, NewTransaction, Plan, PromoCode,
    PromoRedemption,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{finish_opening, RedeemWrite, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn load_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))?
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }

    fn transaction_count(&self, account_id: &AccountId) -> Result<u64> {
        let cf = self.cf(cf::TRANSACTION_COUNTS)?;
        Ok(self
            .db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map_or(0, |value| keys::decode_count(&value)))
    }

    /// Stage `account` and the finished log row into `batch`.
    ///
    /// Must be called with the write lock held.
    fn stage(
        &self,
        batch: &mut WriteBatch,
        account: &Account,
        tx: &CreditTransaction,
    ) -> Result<()> {
        let seq = self.transaction_count(&account.account_id)?;
        self.stage_at(batch, account, tx, seq)
    }

    /// Like [`Self::stage`], with `seq` supplied by a caller staging several rows.
    fn stage_at(
        &self,
        batch: &mut WriteBatch,
        account: &Account,
        tx: &CreditTransaction,
        seq: u64,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_counts = self.cf(cf::TRANSACTION_COUNTS)?;

        let account_key = keys::account_key(&account.account_id);
        let tx_key = keys::transaction_key(&tx.id);

        batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);
        batch.put_cf(&cf_tx, &tx_key, Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&account.account_id, seq),
            &tx_key,
        );
        batch.put_cf(&cf_counts, &account_key, keys::encode_count(seq + 1));

        if let Some(reference) = &tx.reference {
            let cf_refs = self.cf(cf::REFERENCES)?;
            batch.put_cf(&cf_refs, keys::reference_key(reference), &tx_key);
        }
        Ok(())
    }

    /// Apply `tx` to `account` (already mutated by the caller) in one batch.
    fn commit(&self, account: &Account, tx: &CreditTransaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage(&mut batch, account, tx)?;
        self.write(batch)
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn insert_account(
        &self,
        account: &Account,
        opening: Vec<NewTransaction>,
    ) -> Result<Vec<CreditTransaction>> {
        let _guard = self.lock();
        let key = keys::account_key(&account.account_id);
        if self.exists(cf::ACCOUNTS, &key)? {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }

        let opening = finish_opening(account, opening);
        let mut batch = WriteBatch::default();
        if opening.is_empty() {
            let cf = self.cf(cf::ACCOUNTS)?;
            batch.put_cf(&cf, key, Self::serialize(account)?);
        }
        for (seq, tx) in (0u64..).zip(&opening) {
            self.stage_at(&mut batch, account, tx, seq)?;
        }
        self.write(batch)?;
        Ok(opening)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    async fn set_plan(
        &self,
        account_id: &AccountId,
        plan: Plan,
        monthly_allowance: i64,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let _guard = self.lock();
        let mut account = self.load_account(account_id)?;
        account.plan = plan;
        account.monthly_allowance = monthly_allowance;
        account.updated_at = now;

        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(account_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(account)
    }

    // =========================================================================
    // Balance Mutations
    // =========================================================================

    async fn debit(&self, tx: NewTransaction) -> Result<Option<CreditTransaction>> {
        let _guard = self.lock();
        let mut account = self.load_account(&tx.account_id)?;
        let cost = -tx.amount;
        if account.balance < cost {
            return Ok(None);
        }

        account.balance -= cost;
        account.updated_at = tx.created_at;
        let applied = tx.applied(account.balance);
        self.commit(&account, &applied)?;
        Ok(Some(applied))
    }

    async fn credit(&self, tx: NewTransaction) -> Result<CreditTransaction> {
        let _guard = self.lock();
        if let Some(reference) = &tx.reference {
            if self.exists(cf::REFERENCES, &keys::reference_key(reference))? {
                return Err(StoreError::DuplicateReference {
                    reference: reference.clone(),
                });
            }
        }

        let mut account = self.load_account(&tx.account_id)?;
        account.balance = account
            .balance
            .checked_add(tx.amount)
            .ok_or_else(|| StoreError::balance_overflow(tx.account_id))?;
        account.updated_at = tx.created_at;
        let applied = tx.applied(account.balance);
        self.commit(&account, &applied)?;
        Ok(applied)
    }

    async fn reset_balance(
        &self,
        expected_reset_at: Option<DateTime<Utc>>,
        tx: NewTransaction,
    ) -> Result<Option<CreditTransaction>> {
        let _guard = self.lock();
        let mut account = self.load_account(&tx.account_id)?;
        if account.reset_at != expected_reset_at {
            return Ok(None);
        }

        account.balance = tx.amount;
        account.reset_at = Some(tx.created_at);
        account.updated_at = tx.created_at;
        let applied = tx.applied(account.balance);
        self.commit(&account, &applied)?;
        Ok(Some(applied))
    }

    // =========================================================================
    // Transaction Log
    // =========================================================================

    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_key(account_id);
        // Start past the highest possible seq and walk backwards: newest first.
        let upper = keys::account_transaction_key(account_id, u64::MAX);

        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&upper, Direction::Reverse));

        let mut transactions = Vec::new();
        for item in iter.skip(offset) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) || transactions.len() >= limit {
                break;
            }

            let tx_id = keys::transaction_id_from_value(&value).ok_or_else(|| {
                StoreError::Serialization("malformed transaction index entry".into())
            })?;
            if let Some(tx) = self.get(cf::TRANSACTIONS, &keys::transaction_key(&tx_id))? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    async fn count_transactions(&self, account_id: &AccountId) -> Result<u64> {
        self.transaction_count(account_id)
    }

    // =========================================================================
    // Promo Codes
    // =========================================================================

    async fn insert_promo_code(&self, code: &PromoCode) -> Result<()> {
        let _guard = self.lock();
        let key = keys::promo_code_key(&code.code);
        if self.exists(cf::PROMO_CODES, &key)? {
            return Err(StoreError::AlreadyExists {
                entity: "promo code",
                id: code.code.clone(),
            });
        }

        let cf = self.cf(cf::PROMO_CODES)?;
        self.db
            .put_cf(&cf, key, Self::serialize(code)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn set_promo_active(&self, code: &str, is_active: bool) -> Result<PromoCode> {
        let _guard = self.lock();
        let key = keys::promo_code_key(code);
        let mut promo: PromoCode =
            self.get(cf::PROMO_CODES, &key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "promo code",
                    id: code.to_string(),
                })?;
        promo.is_active = is_active;

        let cf = self.cf(cf::PROMO_CODES)?;
        self.db
            .put_cf(&cf, key, Self::serialize(&promo)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(promo)
    }

    async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>> {
        self.get(cf::PROMO_CODES, &keys::promo_code_key(code))
    }

    async fn get_redemption(&self, account_id: &AccountId) -> Result<Option<PromoRedemption>> {
        self.get(cf::PROMO_REDEMPTIONS, &keys::account_key(account_id))
    }

    async fn redeem_promo(&self, code: &PromoCode, tx: NewTransaction) -> Result<RedeemWrite> {
        let _guard = self.lock();
        let mut account = self.load_account(&tx.account_id)?;
        let balance = account
            .balance
            .checked_add(tx.amount)
            .ok_or_else(|| StoreError::balance_overflow(tx.account_id))?;
        let account_key = keys::account_key(&tx.account_id);
        if self.exists(cf::PROMO_REDEMPTIONS, &account_key)? {
            return Ok(RedeemWrite::AlreadyRedeemed);
        }

        let code_key = keys::promo_code_key(&code.code);
        let mut promo: PromoCode =
            self.get(cf::PROMO_CODES, &code_key)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "promo code",
                    id: code.code.clone(),
                })?;
        if promo.max_uses.is_some_and(|max| promo.used_count >= max) {
            return Ok(RedeemWrite::UsageCapReached);
        }
        promo.used_count += 1;

        let redemption = PromoRedemption {
            account_id: tx.account_id,
            promo_code_id: promo.id,
            credits_granted: tx.amount,
            redeemed_at: tx.created_at,
        };

        account.balance = balance;
        account.updated_at = tx.created_at;
        let applied = tx.applied(balance);

        let cf_promos = self.cf(cf::PROMO_CODES)?;
        let cf_redemptions = self.cf(cf::PROMO_REDEMPTIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_promos, &code_key, Self::serialize(&promo)?);
        batch.put_cf(&cf_redemptions, &account_key, Self::serialize(&redemption)?);
        self.stage(&mut batch, &account, &applied)?;
        self.write(batch)?;

        Ok(RedeemWrite::Redeemed(applied))
    }

    // =========================================================================
    // Anonymous Quota
    // =========================================================================

    async fn record_free_generation(&self, entry: &AnonymousQuotaEntry) -> Result<()> {
        let cf = self.cf(cf::ANONYMOUS_QUOTA)?;
        let nonce = uuid::Uuid::new_v4();
        let key = keys::quota_key(&entry.ip_address, entry.created_at, nonce.as_bytes());
        self.db
            .put_cf(&cf, key, Self::serialize(entry)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn count_free_generations(&self, ip_address: &str, since: DateTime<Utc>) -> Result<u64> {
        let cf = self.cf(cf::ANONYMOUS_QUOTA)?;
        let prefix = keys::quota_prefix(ip_address);
        let start = keys::quota_scan_start(ip_address, since);

        let mut count = 0;
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}
