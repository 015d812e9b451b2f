//! In-memory storage implementation.
//!
//! All state lives behind one mutex and every trait method takes it exactly
//! once, so each mutation is a single critical section. The lock is never held
//! across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credit_ledger_core::promo::normalize_code;
use credit_ledger_core::{
    Account, AccountId, AnonymousQuotaEntry, CreditTransaction, NewTransaction, Plan, PromoCode,
    PromoRedemption,
};

use crate::error::{Result, StoreError};
use crate::{finish_opening, RedeemWrite, Store};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    /// Append-only; per-account order is insertion order.
    transactions: Vec<CreditTransaction>,
    references: HashSet<String>,
    /// Keyed by normalized code.
    promo_codes: HashMap<String, PromoCode>,
    redemptions: HashMap<AccountId, PromoRedemption>,
    quota: Vec<AnonymousQuotaEntry>,
}

impl State {
    fn append(&mut self, tx: CreditTransaction) -> CreditTransaction {
        if let Some(reference) = &tx.reference {
            self.references.insert(reference.clone());
        }
        self.transactions.push(tx.clone());
        tx
    }
}

/// Process-local store for tests and single-instance development runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied mutation:
        // every method validates before it writes.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(
        &self,
        account: &Account,
        opening: Vec<NewTransaction>,
    ) -> Result<Vec<CreditTransaction>> {
        let mut state = self.lock();
        if state.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.account_id.to_string(),
            });
        }
        state.accounts.insert(account.account_id, account.clone());
        Ok(finish_opening(account, opening)
            .into_iter()
            .map(|tx| state.append(tx))
            .collect())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock().accounts.get(account_id).cloned())
    }

    async fn set_plan(
        &self,
        account_id: &AccountId,
        plan: Plan,
        monthly_allowance: i64,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        account.plan = plan;
        account.monthly_allowance = monthly_allowance;
        account.updated_at = now;
        Ok(account.clone())
    }

    async fn debit(&self, tx: NewTransaction) -> Result<Option<CreditTransaction>> {
        let mut state = self.lock();
        let cost = -tx.amount;
        let account = state
            .accounts
            .get_mut(&tx.account_id)
            .ok_or_else(|| StoreError::account_not_found(tx.account_id))?;

        if account.balance < cost {
            return Ok(None);
        }
        account.balance -= cost;
        account.updated_at = tx.created_at;
        let balance = account.balance;

        Ok(Some(state.append(tx.applied(balance))))
    }

    async fn credit(&self, tx: NewTransaction) -> Result<CreditTransaction> {
        let mut state = self.lock();
        if let Some(reference) = &tx.reference {
            if state.references.contains(reference) {
                return Err(StoreError::DuplicateReference {
                    reference: reference.clone(),
                });
            }
        }
        let account = state
            .accounts
            .get_mut(&tx.account_id)
            .ok_or_else(|| StoreError::account_not_found(tx.account_id))?;
        let balance = account
            .balance
            .checked_add(tx.amount)
            .ok_or_else(|| StoreError::balance_overflow(tx.account_id))?;
        account.balance = balance;
        account.updated_at = tx.created_at;

        Ok(state.append(tx.applied(balance)))
    }

    async fn reset_balance(
        &self,
        expected_reset_at: Option<DateTime<Utc>>,
        tx: NewTransaction,
    ) -> Result<Option<CreditTransaction>> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&tx.account_id)
            .ok_or_else(|| StoreError::account_not_found(tx.account_id))?;

        if account.reset_at != expected_reset_at {
            return Ok(None);
        }
        account.balance = tx.amount;
        account.reset_at = Some(tx.created_at);
        account.updated_at = tx.created_at;
        let balance = account.balance;

        Ok(Some(state.append(tx.applied(balance))))
    }

    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let state = self.lock();
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.account_id == *account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, account_id: &AccountId) -> Result<u64> {
        let state = self.lock();
        let count = state
            .transactions
            .iter()
            .filter(|tx| tx.account_id == *account_id)
            .count();
        Ok(count as u64)
    }

    async fn insert_promo_code(&self, code: &PromoCode) -> Result<()> {
        let mut state = self.lock();
        let key = normalize_code(&code.code);
        if state.promo_codes.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                entity: "promo code",
                id: code.code.clone(),
            });
        }
        state.promo_codes.insert(key, code.clone());
        Ok(())
    }

    async fn set_promo_active(&self, code: &str, is_active: bool) -> Result<PromoCode> {
        let mut state = self.lock();
        let promo = state
            .promo_codes
            .get_mut(&normalize_code(code))
            .ok_or_else(|| StoreError::NotFound {
                entity: "promo code",
                id: code.to_string(),
            })?;
        promo.is_active = is_active;
        Ok(promo.clone())
    }

    async fn find_promo_code(&self, code: &str) -> Result<Option<PromoCode>> {
        Ok(self.lock().promo_codes.get(&normalize_code(code)).cloned())
    }

    async fn get_redemption(&self, account_id: &AccountId) -> Result<Option<PromoRedemption>> {
        Ok(self.lock().redemptions.get(account_id).cloned())
    }

    async fn redeem_promo(&self, code: &PromoCode, tx: NewTransaction) -> Result<RedeemWrite> {
        let mut state = self.lock();
        let key = normalize_code(&code.code);

        let Some(account) = state.accounts.get(&tx.account_id) else {
            return Err(StoreError::account_not_found(tx.account_id));
        };
        let balance = account
            .balance
            .checked_add(tx.amount)
            .ok_or_else(|| StoreError::balance_overflow(tx.account_id))?;
        if state.redemptions.contains_key(&tx.account_id) {
            return Ok(RedeemWrite::AlreadyRedeemed);
        }

        let promo = state.promo_codes.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            entity: "promo code",
            id: code.code.clone(),
        })?;
        if promo.max_uses.is_some_and(|max| promo.used_count >= max) {
            return Ok(RedeemWrite::UsageCapReached);
        }
        promo.used_count += 1;
        let promo_code_id = promo.id;

        state.redemptions.insert(
            tx.account_id,
            PromoRedemption {
                account_id: tx.account_id,
                promo_code_id,
                credits_granted: tx.amount,
                redeemed_at: tx.created_at,
            },
        );

        let Some(account) = state.accounts.get_mut(&tx.account_id) else {
            return Err(StoreError::account_not_found(tx.account_id));
        };
        account.balance = balance;
        account.updated_at = tx.created_at;

        Ok(RedeemWrite::Redeemed(state.append(tx.applied(balance))))
    }

    async fn record_free_generation(&self, entry: &AnonymousQuotaEntry) -> Result<()> {
        self.lock().quota.push(entry.clone());
        Ok(())
    }

    async fn count_free_generations(&self, ip_address: &str, since: DateTime<Utc>) -> Result<u64> {
        let state = self.lock();
        let count = state
            .quota
            .iter()
            .filter(|entry| entry.ip_address == ip_address && entry.created_at >= since)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use credit_ledger_core::{GenerationType, NewPromoCode, TransactionType};

    async fn store_with_account(balance: i64) -> (MemoryStore, AccountId) {
        let store = MemoryStore::new();
        let mut account = Account::open(AccountId::generate(), Plan::Free, 15, 0, false, Utc::now());
        account.balance = balance;
        store.insert_account(&account, Vec::new()).await.unwrap();
        (store, account.account_id)
    }

    fn promo(code: &str, max_uses: Option<i64>) -> PromoCode {
        NewPromoCode {
            code: code.into(),
            credits_amount: 10,
            expires_at: None,
            max_uses,
        }
        .into_promo_code(Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_account_is_rejected() {
        let (store, id) = store_with_account(0).await;
        let again = Account::open(id, Plan::Free, 15, 0, false, Utc::now());
        let result = store.insert_account(&again, Vec::new()).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn opening_transactions_run_up_to_opening_balance() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = Account::open(AccountId::generate(), Plan::Free, 15, 5, false, now);
        let opening = vec![
            NewTransaction::monthly_reset(account.account_id, 15, now),
            NewTransaction::credit(
                account.account_id,
                5,
                TransactionType::SignupBonus,
                "signup_bonus",
                "Welcome",
                now,
            ),
        ];
        let rows = store.insert_account(&account, opening).await.unwrap();
        let balances: Vec<i64> = rows.iter().map(|tx| tx.balance_after).collect();
        assert_eq!(balances, vec![15, 20]);

        let newest = store.list_transactions(&account.account_id, 1, 0).await.unwrap();
        assert_eq!(newest[0].transaction_type, TransactionType::SignupBonus);
    }

    #[tokio::test]
    async fn debit_refuses_to_overdraw() {
        let (store, id) = store_with_account(5).await;
        let tx = NewTransaction::debit(id, 10, "video_5s", "Video", Utc::now());
        assert!(store.debit(tx).await.unwrap().is_none());
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 5);
        assert_eq!(store.count_transactions(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn debit_to_exactly_zero_succeeds() {
        let (store, id) = store_with_account(10).await;
        let tx = NewTransaction::debit(id, 10, "video_5s", "Video", Utc::now());
        let applied = store.debit(tx).await.unwrap().unwrap();
        assert_eq!(applied.balance_after, 0);
        assert_eq!(applied.amount, -10);
    }

    #[tokio::test]
    async fn debit_unknown_account_is_not_found() {
        let store = MemoryStore::new();
        let tx = NewTransaction::debit(AccountId::generate(), 1, "image", "Image", Utc::now());
        assert!(matches!(store.debit(tx).await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let (store, id) = store_with_account(25).await;
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let tx = NewTransaction::debit(id, 3, "image", "Image", Utc::now());
                    store.debit(tx).await.unwrap().is_some()
                })
            })
            .collect();

        let successes = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(successes, 8);
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 1);
    }

    #[tokio::test]
    async fn credit_rejects_replayed_reference() {
        let (store, id) = store_with_account(0).await;
        let grant = || {
            NewTransaction::credit(id, 50, TransactionType::CreditPack, "small", "Pack", Utc::now())
                .with_reference("pay_1")
        };
        assert_eq!(store.credit(grant()).await.unwrap().balance_after, 50);
        assert!(matches!(
            store.credit(grant()).await,
            Err(StoreError::DuplicateReference { .. })
        ));
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 50);
    }

    #[tokio::test]
    async fn credit_past_i64_max_is_refused() {
        let (store, id) = store_with_account(20).await;
        let tx = NewTransaction::credit(id, i64::MAX, TransactionType::AdminAdjust, "admin", "Grant", Utc::now());
        assert!(matches!(
            store.credit(tx).await,
            Err(StoreError::BalanceOverflow { .. })
        ));
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 20);
        assert_eq!(store.count_transactions(&id).await.unwrap(), 0);

        // The lock is still usable afterwards.
        let tx = NewTransaction::debit(id, 1, "image", "Image", Utc::now());
        assert!(store.debit(tx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reset_is_guarded_by_previous_reset_at() {
        let (store, id) = store_with_account(3).await;
        let before = store.get_account(&id).await.unwrap().unwrap().reset_at;
        let now = Utc::now();

        let first = store
            .reset_balance(before, NewTransaction::monthly_reset(id, 15, now))
            .await
            .unwrap();
        assert_eq!(first.map(|tx| tx.balance_after), Some(15));

        let second = store
            .reset_balance(before, NewTransaction::monthly_reset(id, 15, now))
            .await
            .unwrap();
        assert!(second.is_none());

        let account = store.get_account(&id).await.unwrap().unwrap();
        assert_eq!(account.balance, 15);
        assert_eq!(account.reset_at, Some(now));
        assert_eq!(store.count_transactions(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transactions_are_listed_newest_first() {
        let (store, id) = store_with_account(100).await;
        for n in 1..=3 {
            let tx = NewTransaction::debit(id, n, "image", format!("debit {n}"), Utc::now());
            store.debit(tx).await.unwrap();
        }
        let page = store.list_transactions(&id, 2, 0).await.unwrap();
        assert_eq!(page[0].description, "debit 3");
        assert_eq!(page[1].description, "debit 2");
        let rest = store.list_transactions(&id, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].description, "debit 1");
    }

    #[tokio::test]
    async fn promo_codes_match_case_insensitively() {
        let store = MemoryStore::new();
        store.insert_promo_code(&promo("Launch", None)).await.unwrap();
        assert!(store.find_promo_code("LAUNCH").await.unwrap().is_some());
        assert!(matches!(
            store.insert_promo_code(&promo("launch", None)).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn redemption_is_one_per_account() {
        let (store, id) = store_with_account(0).await;
        let first = promo("ONE", None);
        let second = promo("TWO", None);
        store.insert_promo_code(&first).await.unwrap();
        store.insert_promo_code(&second).await.unwrap();

        let grant = |code: &PromoCode| {
            NewTransaction::credit(id, code.credits_amount, TransactionType::PromoCode, "promo", "Promo", Utc::now())
        };
        assert!(matches!(
            store.redeem_promo(&first, grant(&first)).await.unwrap(),
            RedeemWrite::Redeemed(_)
        ));
        assert_eq!(
            store.redeem_promo(&second, grant(&second)).await.unwrap(),
            RedeemWrite::AlreadyRedeemed
        );
        assert_eq!(store.get_account(&id).await.unwrap().unwrap().balance, 10);
        let unused = store.find_promo_code("two").await.unwrap().unwrap();
        assert_eq!(unused.used_count, 0);
    }

    #[tokio::test]
    async fn overflowing_redemption_leaves_code_untouched() {
        let (store, id) = store_with_account(i64::MAX - 5).await;
        let code = promo("BIG", Some(1));
        store.insert_promo_code(&code).await.unwrap();

        let tx = NewTransaction::credit(id, 10, TransactionType::PromoCode, "promo", "Promo", Utc::now());
        assert!(matches!(
            store.redeem_promo(&code, tx).await,
            Err(StoreError::BalanceOverflow { .. })
        ));
        assert_eq!(store.find_promo_code("big").await.unwrap().unwrap().used_count, 0);
        assert!(store.get_redemption(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn promo_codes_can_be_switched_off_and_on() {
        let store = MemoryStore::new();
        store.insert_promo_code(&promo("Launch", None)).await.unwrap();

        let off = store.set_promo_active("LAUNCH", false).await.unwrap();
        assert!(!off.is_active);
        assert!(!store.find_promo_code("launch").await.unwrap().unwrap().is_active);

        let on = store.set_promo_active("launch", true).await.unwrap();
        assert!(on.is_active);

        assert!(matches!(
            store.set_promo_active("missing", false).await,
            Err(StoreError::NotFound { entity: "promo code", .. })
        ));
    }

    #[tokio::test]
    async fn redemption_respects_cap() {
        let store = MemoryStore::new();
        let code = promo("SOLO", Some(1));
        store.insert_promo_code(&code).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let account = Account::open(AccountId::generate(), Plan::Free, 0, 0, false, Utc::now());
            store.insert_account(&account, Vec::new()).await.unwrap();
            let tx = NewTransaction::credit(
                account.account_id,
                10,
                TransactionType::PromoCode,
                "promo",
                "Promo",
                Utc::now(),
            );
            outcomes.push(store.redeem_promo(&code, tx).await.unwrap());
        }
        assert!(matches!(outcomes[0], RedeemWrite::Redeemed(_)));
        assert_eq!(outcomes[1], RedeemWrite::UsageCapReached);
        assert_eq!(store.find_promo_code("solo").await.unwrap().unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn free_generations_are_counted_per_ip_since_cutoff() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entry = |ip: &str, at: DateTime<Utc>| AnonymousQuotaEntry {
            ip_address: ip.into(),
            fingerprint: None,
            generation_type: GenerationType::Image,
            created_at: at,
        };
        store.record_free_generation(&entry("1.1.1.1", now)).await.unwrap();
        store.record_free_generation(&entry("1.1.1.1", now - chrono::Duration::days(40))).await.unwrap();
        store.record_free_generation(&entry("2.2.2.2", now)).await.unwrap();

        let since = now - chrono::Duration::days(1);
        assert_eq!(store.count_free_generations("1.1.1.1", since).await.unwrap(), 1);
        assert_eq!(store.count_free_generations("3.3.3.3", since).await.unwrap(), 0);
    }
}
