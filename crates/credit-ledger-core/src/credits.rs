//! Credit transaction types.
//!
//! Every change to an account's balance appends one `CreditTransaction`. The
//! store fills in `balance_after` from the same atomic write that moved the
//! balance, so callers describe a mutation with a [`NewTransaction`] and get
//! the finished record back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, TransactionId};

/// An immutable row of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Positive = credit, negative = debit.
    pub amount: i64,

    /// Balance immediately after this transaction was applied.
    pub balance_after: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Cost-table entry or reason this mutation belongs to.
    pub feature: String,

    /// Human-readable description.
    pub description: String,

    /// Unique external reference (payment ID) for idempotent credit grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

/// A balance mutation that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// The account to mutate.
    pub account_id: AccountId,
    /// Signed amount; the sign must agree with `transaction_type`.
    pub amount: i64,
    /// Type of transaction.
    pub transaction_type: TransactionType,
    /// Cost-table entry or reason.
    pub feature: String,
    /// Human-readable description.
    pub description: String,
    /// Optional unique external reference.
    pub reference: Option<String>,
    /// When the mutation was requested.
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    /// A debit for a billable action. `cost` is stored negated.
    #[must_use]
    pub fn debit(
        account_id: AccountId,
        cost: i64,
        feature: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            amount: -cost.abs(),
            transaction_type: TransactionType::Debit,
            feature: feature.into(),
            description: description.into(),
            reference: None,
            created_at: now,
        }
    }

    /// The monthly rollover to `allowance`.
    #[must_use]
    pub fn monthly_reset(account_id: AccountId, allowance: i64, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            amount: allowance,
            transaction_type: TransactionType::MonthlyReset,
            feature: "monthly_reset".to_string(),
            description: format!("Monthly reset to {allowance} credits"),
            reference: None,
            created_at: now,
        }
    }

    /// A credit of the given type.
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        amount: i64,
        transaction_type: TransactionType,
        feature: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            amount,
            transaction_type,
            feature: feature.into(),
            description: description.into(),
            reference: None,
            created_at: now,
        }
    }

    /// Attach a unique external reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Finish the record with the balance produced by the write.
    #[must_use]
    pub fn applied(self, balance_after: i64) -> CreditTransaction {
        CreditTransaction {
            id: TransactionId::generate(),
            account_id: self.account_id,
            amount: self.amount,
            balance_after,
            transaction_type: self.transaction_type,
            feature: self.feature,
            description: self.description,
            reference: self.reference,
            created_at: self.created_at,
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits spent on a billable action.
    Debit,

    /// Balance set to the plan allowance at the start of a month.
    MonthlyReset,

    /// Credits granted by a promo code.
    PromoCode,

    /// Credits bought as a one-time pack.
    CreditPack,

    /// Credits granted when the account was opened.
    SignupBonus,

    /// Manual adjustment by an operator.
    AdminAdjust,
}

impl TransactionType {
    /// The identifier used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::MonthlyReset => "monthly_reset",
            Self::PromoCode => "promo_code",
            Self::CreditPack => "credit_pack",
            Self::SignupBonus => "signup_bonus",
            Self::AdminAdjust => "admin_adjust",
        }
    }

    /// Whether an operator may record a manual grant of this type. The other
    /// types are written by the ledger itself.
    #[must_use]
    pub const fn is_manual_grant(&self) -> bool {
        matches!(self, Self::AdminAdjust | Self::CreditPack)
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "monthly_reset" => Ok(Self::MonthlyReset),
            "promo_code" => Ok(Self::PromoCode),
            "credit_pack" => Ok(Self::CreditPack),
            "signup_bonus" => Ok(Self::SignupBonus),
            "admin_adjust" => Ok(Self::AdminAdjust),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_amount_is_negative() {
        let tx = NewTransaction::debit(AccountId::generate(), 10, "video_5s", "Video", Utc::now());
        assert_eq!(tx.amount, -10);
        assert_eq!(tx.transaction_type, TransactionType::Debit);
    }

    #[test]
    fn applied_keeps_balance_snapshot() {
        let account_id = AccountId::generate();
        let tx = NewTransaction::monthly_reset(account_id, 15, Utc::now()).applied(15);
        assert_eq!(tx.account_id, account_id);
        assert_eq!(tx.amount, 15);
        assert_eq!(tx.balance_after, 15);
        assert_eq!(tx.feature, "monthly_reset");
    }

    #[test]
    fn transaction_type_string_forms_agree_with_serde() {
        for ty in [
            TransactionType::Debit,
            TransactionType::MonthlyReset,
            TransactionType::PromoCode,
            TransactionType::CreditPack,
            TransactionType::SignupBonus,
            TransactionType::AdminAdjust,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(ty.as_str().parse::<TransactionType>(), Ok(ty));
        }
        assert!(TransactionType::AdminAdjust.is_manual_grant());
        assert!(TransactionType::CreditPack.is_manual_grant());
        assert!(!TransactionType::Debit.is_manual_grant());
        assert!(!TransactionType::MonthlyReset.is_manual_grant());
        assert!(!TransactionType::SignupBonus.is_manual_grant());
    }
}
