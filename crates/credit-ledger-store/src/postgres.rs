//! PostgreSQL storage implementation.
//!
//! Balance mutations are single conditional `UPDATE ... RETURNING` statements
//! run in the same SQL transaction as the log insert, so concurrent writers on
//! any number of service instances are serialized by the row lock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};

use credit_ledger_core::promo::normalize_code;
use credit_ledger_core::{
    Account, AccountId, AnonymousQuotaEntry, CreditTransaction, NewTransaction, Plan, PromoCode,
    PromoCodeId, PromoRedemption,
};

use crate::error::{Result, StoreError};
use crate::{finish_opening, RedeemWrite, Store};

const ACCOUNT_COLUMNS: &str =
    "account_id, balance, monthly_allowance, reset_at, plan, is_admin, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, amount, balance_after, transaction_type, \
                                   feature, description, reference, created_at";

const PROMO_COLUMNS: &str =
    "id, code, credits_amount, is_active, expires_at, max_uses, used_count, created_at";

/// PostgreSQL-backed storage.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create with an existing connection pool.
    #[must_use]
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn account_exists(&self, account_id: &AccountId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM accounts WHERE account_id = $1")
            .bind(account_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `numeric_value_out_of_range`, raised when `balance + $n` leaves BIGINT.
fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("22003"))
}

fn credit_error(err: sqlx::Error, account_id: AccountId) -> StoreError {
    if is_out_of_range(&err) {
        StoreError::balance_overflow(account_id)
    } else {
        err.into()
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StoreError::Serialization)
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let plan: String = row.try_get("plan")?;
    Ok(Account {
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        balance: row.try_get("balance")?,
        monthly_allowance: row.try_get("monthly_allowance")?,
        reset_at: row.try_get("reset_at")?,
        plan: parse_column(&plan)?,
        is_admin: row.try_get("is_admin")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = row.try_get("id")?;
    let transaction_type: String = row.try_get("transaction_type")?;
    Ok(CreditTransaction {
        id: id.parse().map_err(|e: credit_ledger_core::IdError| {
            StoreError::Serialization(e.to_string())
        })?,
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        transaction_type: parse_column(&transaction_type)?,
        feature: row.try_get("feature")?,
        description: row.try_get("description")?,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

fn promo_from_row(row: &PgRow) -> Result<PromoCode> {
    Ok(PromoCode {
        id: PromoCodeId::from_uuid(row.try_get("id")?),
        code: row.try_get("code")?,
        credits_amount: row.try_get("credits_amount")?,
        is_active: row.try_get("is_active")?,
        expires_at: row.try_get("expires_at")?,
        max_uses: row.try_get("max_uses")?,
        used_count: row.try_get("used_count")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Append a finished row to the log on `conn`.
async fn insert_transaction(conn: &mut PgConnection, tx: &CreditTransaction) -> Result<()> {
    let result = sqlx::query(
        "INSERT INTO transactions \
         (id, account_id, amount, balance_after, transaction_type, feature, description, reference, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(tx.id.to_string())
    .bind(tx.account_id.as_uuid())
    .bind(tx.amount)
    .bind(tx.balance_after)
    .bind(tx.transaction_type.as_str())
    .bind(&tx.feature)
    .bind(&tx.description)
    .bind(&tx.reference)
    .bind(tx.created_at)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) && tx.reference.is_some() => {
            Err(StoreError::DuplicateReference {
                reference: tx.reference.clone().unwrap_or_default(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(
        &self,
        account: &Account,
        opening: Vec<NewTransaction>,
    ) -> Result<Vec<CreditTransaction>> {
        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO accounts \
             (account_id, balance, monthly_allowance, reset_at, plan, is_admin, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account.account_id.as_uuid())
        .bind(account.balance)
        .bind(account.monthly_allowance)
        .bind(account.reset_at)
        .bind(account.plan.as_str())
        .bind(account.is_admin)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *db_tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }

        let opening = finish_opening(account, opening);
        for tx in &opening {
            insert_transaction(&mut db_tx, tx).await?;
        }

        db_tx.commit().await?;
        Ok(opening)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1");
        sqlx::query(&query)
            .bind(account_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn set_plan(
        &self,
        account_id: &AccountId,
        plan: Plan,
        monthly_allowance: i64,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let query = format!(
            "UPDATE accounts SET plan = $2, monthly_allowance = $3, updated_at = $4 \
             WHERE account_id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(account_id.as_uuid())
            .bind(plan.as_str())
            .bind(monthly_allowance)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        account_from_row(&row)
    }

    async fn debit(&self, tx: NewTransaction) -> Result<Option<CreditTransaction>> {
        let cost = -tx.amount;
        let mut db_tx = self.pool.begin().await?;

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance - $2, updated_at = $3 \
             WHERE account_id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(tx.account_id.as_uuid())
        .bind(cost)
        .bind(tx.created_at)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(balance) = balance else {
            db_tx.rollback().await?;
            if self.account_exists(&tx.account_id).await? {
                return Ok(None);
            }
            return Err(StoreError::account_not_found(tx.account_id));
        };

        let applied = tx.applied(balance);
        insert_transaction(&mut db_tx, &applied).await?;
        db_tx.commit().await?;
        Ok(Some(applied))
    }

    async fn credit(&self, tx: NewTransaction) -> Result<CreditTransaction> {
        let mut db_tx = self.pool.begin().await?;

        let balance: i64 = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + $2, updated_at = $3 \
             WHERE account_id = $1 RETURNING balance",
        )
        .bind(tx.account_id.as_uuid())
        .bind(tx.amount)
        .bind(tx.created_at)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| credit_error(e, tx.account_id))?
        .ok_or_else(|| StoreError::account_not_found(tx.account_id))?;

        let applied = tx.applied(balance);
        // A replayed reference fails here and the balance update rolls back.
        insert_transaction(&mut db_tx, &applied).await?;
        db_tx.commit().await?;
        Ok(applied)
    }

    async fn reset_balance(
        &self,
        expected_reset_at: Option<DateTime<Utc>>,
        tx: NewTransaction,
    ) -> Result<Option<CreditTransaction>> {
        let mut db_tx = self.pool.begin().await?;

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = $2, reset_at = $3, updated_at = $3 \
             WHERE account_id = $1 AND reset_at IS NOT DISTINCT FROM $4 RETURNING balance",
        )
        .bind(tx.account_id.as_uuid())
        .bind(tx.amount)
        .bind(tx.created_at)
        .bind(expected_reset_at)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(balance) = balance else {
            db_tx.rollback().await?;
            return Ok(None);
        };

        let applied = tx.applied(balance);
        insert_transaction(&mut db_tx, &applied).await?;
        db_tx.commit().await?;
        Ok(Some(applied))
    }

    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = $1 \
             ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&query)
            .bind(account_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&*self.pool)
            .await?
            .iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn count_transactions(&self, account_id: &AccountId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = $1")
            .bind(account_id.as_uuid())
            .fetch_one(&*self.pool)
            .await?;
        Ok(to_u64(count))
    }

    async fn insert_promo_code(&self, code: &PromoCode) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO promo_codes \
             (id, code, credits_amount, is_active, expires_at, max_uses, used_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(code.id.as_uuid())
        .bind(&code.code)
        .bind(code.credits_amount)
        .bind(code.is_active)
        .bind(code.expires_at)
        .bind(code.max_uses)
        .bind(code.used_count)
        .bind(code.created_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
                entity: "promo code",
                id: code.code.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_promo_active(&self, code: &str, is_active: bool) -> Result<PromoCode> {
        let query = format!(
            "UPDATE promo_codes SET is_active = $2 WHERE LOWER(code) = $1 RETURNING {PROMO_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(normalize_code(code))
            .bind(is_active)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "promo code",
                id: code.to_string(),
            })?;
        promo_from_row(&row)
    }

    async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>> {
        let query = format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE LOWER(code) = $1");
        sqlx::query(&query)
            .bind(normalize_code(code))
            .fetch_optional(&*self.pool)
            .await?
            .as_ref()
            .map(promo_from_row)
            .transpose()
    }

    async fn get_redemption(&self, account_id: &AccountId) -> Result<Option<PromoRedemption>> {
        let row = sqlx::query(
            "SELECT account_id, promo_code_id, credits_granted, redeemed_at \
             FROM promo_redemptions WHERE account_id = $1",
        )
        .bind(account_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| {
            Ok::<_, StoreError>(PromoRedemption {
                account_id: AccountId::from_uuid(row.try_get("account_id")?),
                promo_code_id: PromoCodeId::from_uuid(row.try_get("promo_code_id")?),
                credits_granted: row.try_get("credits_granted")?,
                redeemed_at: row.try_get("redeemed_at")?,
            })
        })
        .transpose()
    }

    async fn redeem_promo(&self, code: &PromoCode, tx: NewTransaction) -> Result<RedeemWrite> {
        let mut db_tx = self.pool.begin().await?;

        // Locks the account row first so redemptions by one account serialize.
        let balance: i64 = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + $2, updated_at = $3 \
             WHERE account_id = $1 RETURNING balance",
        )
        .bind(tx.account_id.as_uuid())
        .bind(tx.amount)
        .bind(tx.created_at)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| credit_error(e, tx.account_id))?
        .ok_or_else(|| StoreError::account_not_found(tx.account_id))?;

        let redeemed = sqlx::query(
            "INSERT INTO promo_redemptions (account_id, promo_code_id, credits_granted, redeemed_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(tx.account_id.as_uuid())
        .bind(code.id.as_uuid())
        .bind(tx.amount)
        .bind(tx.created_at)
        .execute(&mut *db_tx)
        .await?;

        if redeemed.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(RedeemWrite::AlreadyRedeemed);
        }

        let taken = sqlx::query(
            "UPDATE promo_codes SET used_count = used_count + 1 \
             WHERE id = $1 AND (max_uses IS NULL OR used_count < max_uses)",
        )
        .bind(code.id.as_uuid())
        .execute(&mut *db_tx)
        .await?;

        if taken.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(RedeemWrite::UsageCapReached);
        }

        let applied = tx.applied(balance);
        insert_transaction(&mut db_tx, &applied).await?;
        db_tx.commit().await?;
        Ok(RedeemWrite::Redeemed(applied))
    }

    async fn record_free_generation(&self, entry: &AnonymousQuotaEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO anonymous_quota (ip_address, fingerprint, generation_type, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&entry.ip_address)
        .bind(&entry.fingerprint)
        .bind(entry.generation_type.as_str())
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn count_free_generations(&self, ip_address: &str, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM anonymous_quota WHERE ip_address = $1 AND created_at >= $2",
        )
        .bind(ip_address)
        .bind(since)
        .fetch_one(&*self.pool)
        .await?;
        Ok(to_u64(count))
    }
}

/// These run against a real database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::{NewPromoCode, TransactionType};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn account(store: &PgStore, balance: i64) -> AccountId {
        let mut account = Account::open(AccountId::generate(), Plan::Free, 15, 0, false, Utc::now());
        account.balance = balance;
        store.insert_account(&account, Vec::new()).await.unwrap();
        account.account_id
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn debit_is_conditional() {
        let store = store().await;
        let id = account(&store, 5).await;

        let refused = store
            .debit(NewTransaction::debit(id, 10, "video_5s", "Video", Utc::now()))
            .await
            .unwrap();
        assert!(refused.is_none());

        let applied = store
            .debit(NewTransaction::debit(id, 5, "image", "Image", Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.balance_after, 0);
        assert_eq!(store.count_transactions(&id).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_debits_never_overdraw() {
        let store = Arc::new(store().await);
        let id = account(&store, 10).await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .debit(NewTransaction::debit(id, 3, "image", "Image", Utc::now()))
                        .await
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn replayed_reference_is_rejected() {
        let store = store().await;
        let id = account(&store, 0).await;
        let reference = format!("pay_{}", AccountId::generate());
        let grant = || {
            NewTransaction::credit(id, 50, TransactionType::CreditPack, "small", "Pack", Utc::now())
                .with_reference(reference.clone())
        };

        store.credit(grant()).await.unwrap();
        assert!(matches!(
            store.credit(grant()).await,
            Err(StoreError::DuplicateReference { .. })
        ));
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 50);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn credit_past_i64_max_is_refused() {
        let store = store().await;
        let id = account(&store, 20).await;
        let grant = NewTransaction::credit(id, i64::MAX, TransactionType::AdminAdjust, "admin", "Grant", Utc::now());

        assert!(matches!(
            store.credit(grant).await,
            Err(StoreError::BalanceOverflow { .. })
        ));
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 20);
        assert_eq!(store.count_transactions(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn promo_codes_can_be_switched_off() {
        let store = store().await;
        let code = NewPromoCode {
            code: format!("OFF-{}", AccountId::generate()),
            credits_amount: 10,
            expires_at: None,
            max_uses: None,
        }
        .into_promo_code(Utc::now())
        .unwrap();
        store.insert_promo_code(&code).await.unwrap();

        let off = store.set_promo_active(&code.code.to_lowercase(), false).await.unwrap();
        assert!(!off.is_active);
        assert!(matches!(
            store.set_promo_active("no-such-code", false).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn promo_redemption_is_once_per_account() {
        let store = store().await;
        let id = account(&store, 0).await;
        let code = NewPromoCode {
            code: format!("PG-{}", AccountId::generate()),
            credits_amount: 10,
            expires_at: None,
            max_uses: Some(5),
        }
        .into_promo_code(Utc::now())
        .unwrap();
        store.insert_promo_code(&code).await.unwrap();

        let found = store.find_promo_code(&code.code.to_uppercase()).await.unwrap().unwrap();
        assert_eq!(found.id, code.id);

        let grant = || {
            NewTransaction::credit(id, 10, TransactionType::PromoCode, "promo", "Promo", Utc::now())
        };
        assert!(matches!(
            store.redeem_promo(&code, grant()).await.unwrap(),
            RedeemWrite::Redeemed(_)
        ));
        assert_eq!(
            store.redeem_promo(&code, grant()).await.unwrap(),
            RedeemWrite::AlreadyRedeemed
        );
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 10);
        assert!(store.get_redemption(&id).await.unwrap().is_some());
    }
}
