//! The ledger orchestrator.
//!
//! Every balance-touching operation starts by bringing the account up to date
//! for the current calendar month, then performs exactly one atomic store
//! write. Business outcomes (insufficient balance, a rejected promo code, an
//! anonymous caller asking for video) come back as values; `Err` means the
//! store failed or the input was malformed.

use std::sync::Arc;

use serde::Serialize;

use credit_ledger_core::{
    month_start, same_calendar_month, Account, AccountId, AnonymousQuotaEntry, Clock,
    CreditTransaction, GenerationType, LedgerConfig, LedgerError, NewPromoCode, NewTransaction,
    Plan, PromoCode, PromoError, Result, SystemClock, TransactionId, TransactionType,
};
use credit_ledger_store::{RedeemWrite, Store};

/// Largest page `get_history` returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Feature name recorded on signup bonus transactions.
const SIGNUP_BONUS_FEATURE: &str = "signup_bonus";

/// Feature name recorded on promo code transactions.
const PROMO_CODE_FEATURE: &str = "promo_code";

/// Result of an affordability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Credits the action costs.
    pub cost: i64,
    /// Balance after any rollover.
    pub balance: i64,
}

/// Result of a deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeductOutcome {
    /// `false` only when the balance did not cover the cost at write time.
    pub success: bool,
    /// Balance after the deduction, or the current balance if it was refused.
    pub new_balance: i64,
    /// Credits the action costs.
    pub cost: i64,
    /// The debit row, if one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

/// Result of a credit addition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditOutcome {
    /// Balance after the credit.
    pub new_balance: i64,
    /// The credit row.
    pub transaction_id: TransactionId,
}

impl From<CreditTransaction> for CreditOutcome {
    fn from(tx: CreditTransaction) -> Self {
        Self {
            new_balance: tx.balance_after,
            transaction_id: tx.id,
        }
    }
}

/// Result of a promo code redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedeemOutcome {
    /// Whether credits were granted.
    pub success: bool,
    /// Credits granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    /// Balance after the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
    /// Why the code was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PromoError>,
}

impl RedeemOutcome {
    fn rejected(error: PromoError) -> Self {
        Self {
            success: false,
            credits: None,
            new_balance: None,
            error: Some(error),
        }
    }
}

/// Why an anonymous generation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeGenerationDenial {
    /// The generation type needs a signed-in account.
    RequiresAccount,
    /// This month's free generations are used up.
    LimitReached,
}

/// Result of an anonymous quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeGenerationCheck {
    /// Whether the generation may proceed.
    pub allowed: bool,
    /// Free generations this IP used in the current calendar month.
    pub used: u64,
    /// Free generations allowed per month.
    pub limit: u32,
    /// Why the generation was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FreeGenerationDenial>,
}

/// One page of an account's transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    /// Transactions, newest first.
    pub transactions: Vec<CreditTransaction>,
    /// Total transactions on the account.
    pub total: u64,
    /// The 1-based page that was returned.
    pub page: u32,
    /// The effective page size.
    pub page_size: u32,
}

/// Credit ledger operations over a [`Store`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    config: Arc<LedgerConfig>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Create a ledger reading time from the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a ledger with an explicit clock.
    #[must_use]
    pub fn with_clock(store: Arc<dyn Store>, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            clock,
        }
    }

    /// The static configuration in use.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Open an account on `plan`.
    ///
    /// The opening balance is the plan allowance plus the signup bonus. The
    /// allowance is logged as a `monthly_reset` row and the bonus as a
    /// `signup_bonus` row, each only when positive, so the log sums to the
    /// opening balance.
    pub async fn open_account(
        &self,
        account_id: AccountId,
        plan: Plan,
        is_admin: bool,
    ) -> Result<Account> {
        let now = self.clock.now();
        let allowance = self.config.plans.allowance(plan);
        let bonus = self.config.signup_bonus.max(0);
        let account = Account::open(account_id, plan, allowance, bonus, is_admin, now);

        let mut opening = Vec::with_capacity(2);
        if allowance > 0 {
            opening.push(NewTransaction::monthly_reset(account_id, allowance, now));
        }
        if bonus > 0 {
            opening.push(NewTransaction::credit(
                account_id,
                bonus,
                TransactionType::SignupBonus,
                SIGNUP_BONUS_FEATURE,
                format!("Signup bonus of {bonus} credits"),
                now,
            ));
        }
        self.store.insert_account(&account, opening).await?;

        tracing::info!(
            account_id = %account_id,
            plan = %plan,
            balance = account.balance,
            is_admin,
            "Account opened"
        );
        Ok(account)
    }

    /// Fetch an account, applying the monthly rollover first.
    pub async fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        let account = self.load(account_id).await?;
        Ok(self.ensure_monthly_reset(account).await)
    }

    /// Current balance, after rollover.
    pub async fn get_balance(&self, account_id: &AccountId) -> Result<i64> {
        Ok(self.get_account(account_id).await?.balance)
    }

    /// Whether the account bypasses balance checks. Unknown accounts are not admins.
    pub async fn is_admin(&self, account_id: &AccountId) -> Result<bool> {
        Ok(self
            .store
            .get_account(account_id)
            .await?
            .is_some_and(|account| account.is_admin))
    }

    /// Move an account to `plan`. The balance changes at the next rollover.
    pub async fn change_plan(&self, account_id: &AccountId, plan: Plan) -> Result<Account> {
        let allowance = self.config.plans.allowance(plan);
        let account = self
            .store
            .set_plan(account_id, plan, allowance, self.clock.now())
            .await?;

        tracing::info!(account_id = %account_id, plan = %plan, allowance, "Plan changed");
        Ok(account)
    }

    async fn load(&self, account_id: &AccountId) -> Result<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }

    /// Reset the balance to the monthly allowance if `account` was last reset
    /// in an earlier calendar month.
    ///
    /// Exactly one concurrent caller wins the conditional write; the others
    /// re-read the winner's result. A failed write is logged and the stale
    /// account returned, so the next access retries.
    pub async fn ensure_monthly_reset(&self, account: Account) -> Account {
        let now = self.clock.now();
        let tz = self.config.timezone;
        let current = account
            .reset_at
            .is_some_and(|at| same_calendar_month(at, now, tz));
        if current || account.monthly_allowance <= 0 {
            return account;
        }

        let account_id = account.account_id;
        let tx = NewTransaction::monthly_reset(account_id, account.monthly_allowance, now);
        match self.store.reset_balance(account.reset_at, tx).await {
            Ok(Some(applied)) => {
                tracing::info!(
                    account_id = %account_id,
                    discarded = account.balance,
                    balance = applied.balance_after,
                    "Monthly rollover applied"
                );
                Account {
                    balance: applied.balance_after,
                    reset_at: Some(now),
                    updated_at: now,
                    ..account
                }
            }
            Ok(None) => match self.store.get_account(&account_id).await {
                Ok(Some(fresh)) => fresh,
                Ok(None) => account,
                Err(e) => {
                    tracing::warn!(account_id = %account_id, error = %e, "Re-read after rollover race failed");
                    account
                }
            },
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    error = %e,
                    "Monthly rollover failed; returning stale balance"
                );
                account
            }
        }
    }

    // =========================================================================
    // Spending
    // =========================================================================

    /// Check whether the account can pay for `feature`.
    pub async fn check_credits(
        &self,
        account_id: &AccountId,
        feature: &str,
        duration_seconds: Option<u32>,
    ) -> Result<CheckOutcome> {
        let account = self.get_account(account_id).await?;
        let cost = self.config.costs.resolve_cost(feature, duration_seconds);

        Ok(CheckOutcome {
            allowed: account.can_afford(cost),
            cost,
            balance: account.balance,
        })
    }

    /// Charge the account for `feature`.
    ///
    /// The balance is checked again at write time, so of any number of
    /// concurrent deductions only those the balance covers succeed. Free
    /// features and admin accounts succeed without writing anything.
    pub async fn deduct_credits(
        &self,
        account_id: &AccountId,
        feature: &str,
        duration_seconds: Option<u32>,
        description: Option<&str>,
    ) -> Result<DeductOutcome> {
        let account = self.get_account(account_id).await?;
        let resolved = self.config.costs.resolve(feature, duration_seconds);
        let cost = resolved.credits;

        if cost <= 0 || account.is_admin {
            return Ok(DeductOutcome {
                success: true,
                new_balance: account.balance,
                cost,
                transaction_id: None,
            });
        }

        let description = description.map_or_else(
            || format!("{} ({cost} credits)", resolved.entry),
            str::to_string,
        );
        let tx = NewTransaction::debit(
            *account_id,
            cost,
            resolved.entry,
            description,
            self.clock.now(),
        );

        if let Some(applied) = self.store.debit(tx).await? {
            tracing::info!(
                account_id = %account_id,
                feature = %applied.feature,
                cost,
                balance = applied.balance_after,
                "Credits deducted"
            );
            return Ok(DeductOutcome {
                success: true,
                new_balance: applied.balance_after,
                cost,
                transaction_id: Some(applied.id),
            });
        }

        let balance = self
            .store
            .get_account(account_id)
            .await?
            .map_or(account.balance, |a| a.balance);
        tracing::debug!(
            account_id = %account_id,
            feature = %feature,
            cost,
            balance,
            "Deduction refused: insufficient balance"
        );
        Ok(DeductOutcome {
            success: false,
            new_balance: balance,
            cost,
            transaction_id: None,
        })
    }

    // =========================================================================
    // Crediting
    // =========================================================================

    /// Add `amount` credits to the account.
    ///
    /// # Errors
    ///
    /// `LedgerError::InvalidAmount` if `amount` is not positive.
    pub async fn add_credits(
        &self,
        account_id: &AccountId,
        amount: i64,
        transaction_type: TransactionType,
        feature: &str,
        description: &str,
    ) -> Result<CreditOutcome> {
        self.credit(account_id, amount, transaction_type, feature, description, None)
            .await
    }

    /// Grant the credits of a purchased pack, keyed by the payment ID.
    ///
    /// # Errors
    ///
    /// - `LedgerError::UnknownPack` if `pack` is not configured.
    /// - `LedgerError::DuplicateReference` if `payment_id` was already fulfilled.
    pub async fn fulfil_credit_pack(
        &self,
        account_id: &AccountId,
        pack: &str,
        payment_id: &str,
    ) -> Result<CreditOutcome> {
        let credits = self
            .config
            .credit_packs
            .credits(pack)
            .ok_or_else(|| LedgerError::UnknownPack(pack.to_string()))?;

        self.credit(
            account_id,
            credits,
            TransactionType::CreditPack,
            pack,
            &format!("Credit pack '{pack}' ({credits} credits)"),
            Some(payment_id),
        )
        .await
    }

    async fn credit(
        &self,
        account_id: &AccountId,
        amount: i64,
        transaction_type: TransactionType,
        feature: &str,
        description: &str,
        reference: Option<&str>,
    ) -> Result<CreditOutcome> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "credit amount must be positive, got {amount}"
            )));
        }

        // Roll over first so a stale month cannot wipe the credit just added.
        self.get_account(account_id).await?;

        let mut tx = NewTransaction::credit(
            *account_id,
            amount,
            transaction_type,
            feature,
            description,
            self.clock.now(),
        );
        if let Some(reference) = reference {
            tx = tx.with_reference(reference);
        }

        let applied = self.store.credit(tx).await?;
        tracing::info!(
            account_id = %account_id,
            amount,
            transaction_type = transaction_type.as_str(),
            balance = applied.balance_after,
            "Credits added"
        );
        Ok(applied.into())
    }

    // =========================================================================
    // Promo Codes
    // =========================================================================

    /// Add a promo code to the catalog.
    ///
    /// # Errors
    ///
    /// `LedgerError::InvalidPromoCode` for invalid input or a code that already
    /// exists in any letter case.
    pub async fn create_promo_code(&self, input: NewPromoCode) -> Result<PromoCode> {
        let code = input.into_promo_code(self.clock.now())?;
        self.store.insert_promo_code(&code).await?;
        tracing::info!(code = %code.code, credits = code.credits_amount, "Promo code created");
        Ok(code)
    }

    /// Switch a promo code on or off. Inactive codes are refused before any
    /// other check.
    ///
    /// # Errors
    ///
    /// `LedgerError::PromoCodeNotFound` if no code matches in any letter case.
    pub async fn set_promo_active(&self, code: &str, is_active: bool) -> Result<PromoCode> {
        let promo = self.store.set_promo_active(code, is_active).await?;
        tracing::info!(code = %promo.code, is_active, "Promo code updated");
        Ok(promo)
    }

    /// Redeem `code` for the account.
    ///
    /// Checks run in a fixed order and the first failure is reported: unknown,
    /// inactive, expired, used up, then already redeemed. The final write
    /// re-checks the last two atomically.
    pub async fn redeem_promo_code(
        &self,
        account_id: &AccountId,
        code: &str,
    ) -> Result<RedeemOutcome> {
        self.get_account(account_id).await?;
        let now = self.clock.now();

        let Some(promo) = self.store.find_promo_code(code).await? else {
            tracing::debug!(account_id = %account_id, "Promo code not found");
            return Ok(RedeemOutcome::rejected(PromoError::InvalidCode));
        };
        if let Err(error) = promo.check_redeemable(now) {
            tracing::debug!(account_id = %account_id, code = %promo.code, error = error.code(), "Promo code refused");
            return Ok(RedeemOutcome::rejected(error));
        }
        if self.store.get_redemption(account_id).await?.is_some() {
            tracing::debug!(account_id = %account_id, code = %promo.code, "Account already redeemed a promo code");
            return Ok(RedeemOutcome::rejected(PromoError::AlreadyRedeemed));
        }

        let tx = NewTransaction::credit(
            *account_id,
            promo.credits_amount,
            TransactionType::PromoCode,
            PROMO_CODE_FEATURE,
            format!("Promo code {}", promo.code),
            now,
        );

        match self.store.redeem_promo(&promo, tx).await? {
            RedeemWrite::Redeemed(applied) => {
                tracing::info!(
                    account_id = %account_id,
                    code = %promo.code,
                    credits = promo.credits_amount,
                    balance = applied.balance_after,
                    "Promo code redeemed"
                );
                Ok(RedeemOutcome {
                    success: true,
                    credits: Some(promo.credits_amount),
                    new_balance: Some(applied.balance_after),
                    error: None,
                })
            }
            RedeemWrite::AlreadyRedeemed => Ok(RedeemOutcome::rejected(PromoError::AlreadyRedeemed)),
            RedeemWrite::UsageCapReached => Ok(RedeemOutcome::rejected(PromoError::UsageCapReached)),
        }
    }

    // =========================================================================
    // History
    // =========================================================================

    /// One page of the account's transactions, newest first.
    ///
    /// `page` is 1-based (0 is read as 1); `page_size` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub async fn get_history(
        &self,
        account_id: &AccountId,
        page: u32,
        page_size: u32,
    ) -> Result<History> {
        self.load(account_id).await?;
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page as usize - 1).saturating_mul(page_size as usize);

        let transactions = self
            .store
            .list_transactions(account_id, page_size as usize, offset)
            .await?;
        let total = self.store.count_transactions(account_id).await?;

        Ok(History {
            transactions,
            total,
            page,
            page_size,
        })
    }

    // =========================================================================
    // Anonymous Quota
    // =========================================================================

    /// Check whether an anonymous caller at `ip_address` may generate.
    pub async fn check_free_generation(
        &self,
        ip_address: &str,
        generation_type: GenerationType,
    ) -> Result<FreeGenerationCheck> {
        let limit = self.config.free_tier_limit;
        if !generation_type.allowed_anonymously() {
            return Ok(FreeGenerationCheck {
                allowed: false,
                used: 0,
                limit,
                reason: Some(FreeGenerationDenial::RequiresAccount),
            });
        }

        let since = month_start(self.clock.now(), self.config.timezone);
        let used = self
            .store
            .count_free_generations(ip_address.trim(), since)
            .await?;
        let allowed = used < u64::from(limit);

        Ok(FreeGenerationCheck {
            allowed,
            used,
            limit,
            reason: (!allowed).then_some(FreeGenerationDenial::LimitReached),
        })
    }

    /// Record one successful anonymous generation.
    pub async fn record_free_generation(
        &self,
        ip_address: &str,
        fingerprint: Option<String>,
        generation_type: GenerationType,
    ) -> Result<()> {
        let entry = AnonymousQuotaEntry {
            ip_address: ip_address.trim().to_string(),
            fingerprint,
            generation_type,
            created_at: self.clock.now(),
        };
        self.store.record_free_generation(&entry).await?;
        tracing::debug!(ip_address = %entry.ip_address, generation_type = %generation_type, "Free generation recorded");
        Ok(())
    }
}
