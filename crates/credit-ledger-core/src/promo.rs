//! Promo code catalog and redemption records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, LedgerError, PromoCodeId};

/// A redeemable promo code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Primary key.
    pub id: PromoCodeId,
    /// The code as it was created. Lookups ignore case.
    pub code: String,
    /// Credits granted per redemption.
    pub credits_amount: i64,
    /// Inactive codes cannot be redeemed.
    pub is_active: bool,
    /// Codes cannot be redeemed at or after this instant.
    pub expires_at: Option<DateTime<Utc>>,
    /// Total redemptions allowed across all accounts.
    pub max_uses: Option<i64>,
    /// Redemptions so far.
    pub used_count: i64,
    /// When the code was created.
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    /// Run the catalog-side checks, in order: active, not expired, under cap.
    ///
    /// # Errors
    ///
    /// Returns the first [`PromoError`] that applies.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), PromoError> {
        if !self.is_active {
            return Err(PromoError::InactiveCode);
        }
        if self.expires_at.is_some_and(|at| at <= now) {
            return Err(PromoError::ExpiredCode);
        }
        if self.max_uses.is_some_and(|max| self.used_count >= max) {
            return Err(PromoError::UsageCapReached);
        }
        Ok(())
    }
}

/// Normalize user input into the form codes are matched on.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Admin input for a new catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPromoCode {
    /// The code users type.
    pub code: String,
    /// Credits granted per redemption.
    pub credits_amount: i64,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional global redemption cap.
    #[serde(default)]
    pub max_uses: Option<i64>,
}

impl NewPromoCode {
    /// Validate and build the catalog row.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidPromoCode` for an empty code, a
    /// non-positive credit amount or a non-positive cap.
    pub fn into_promo_code(self, now: DateTime<Utc>) -> Result<PromoCode, LedgerError> {
        let code = self.code.trim().to_string();
        if code.is_empty() {
            return Err(LedgerError::InvalidPromoCode("code must not be empty".into()));
        }
        if self.credits_amount <= 0 {
            return Err(LedgerError::InvalidPromoCode(
                "credits_amount must be positive".into(),
            ));
        }
        if self.max_uses.is_some_and(|max| max <= 0) {
            return Err(LedgerError::InvalidPromoCode("max_uses must be positive".into()));
        }

        Ok(PromoCode {
            id: PromoCodeId::generate(),
            code,
            credits_amount: self.credits_amount,
            is_active: true,
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            used_count: 0,
            created_at: now,
        })
    }
}

/// The one redemption an account is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoRedemption {
    /// Redeeming account. Unique across all redemptions.
    pub account_id: AccountId,
    /// Code that was redeemed.
    pub promo_code_id: PromoCodeId,
    /// Credits the redemption granted.
    pub credits_granted: i64,
    /// When the redemption happened.
    pub redeemed_at: DateTime<Utc>,
}

/// Why a promo redemption was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum PromoError {
    /// No code matches.
    #[error("invalid promo code")]
    InvalidCode,
    /// The code has been switched off.
    #[error("promo code is not active")]
    InactiveCode,
    /// The code is past its expiry.
    #[error("promo code has expired")]
    ExpiredCode,
    /// The code has no redemptions left.
    #[error("promo code usage limit reached")]
    UsageCapReached,
    /// The account already redeemed a code.
    #[error("a promo code has already been redeemed on this account")]
    AlreadyRedeemed,
}

impl PromoError {
    /// Stable error code for API consumers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidCode => "invalid_code",
            Self::InactiveCode => "inactive_code",
            Self::ExpiredCode => "expired_code",
            Self::UsageCapReached => "usage_cap_reached",
            Self::AlreadyRedeemed => "already_redeemed",
        }
    }
}

impl fmt::Display for PromoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (+{} credits)", self.code, self.credits_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code(now: DateTime<Utc>) -> PromoCode {
        NewPromoCode {
            code: "  LAUNCH ".into(),
            credits_amount: 25,
            expires_at: None,
            max_uses: None,
        }
        .into_promo_code(now)
        .unwrap()
    }

    #[test]
    fn new_code_is_trimmed_and_active() {
        let promo = code(Utc::now());
        assert_eq!(promo.code, "LAUNCH");
        assert!(promo.is_active);
        assert_eq!(promo.used_count, 0);
    }

    #[test]
    fn normalize_ignores_case_and_padding() {
        assert_eq!(normalize_code(" Launch "), normalize_code("launch"));
    }

    #[test]
    fn inactive_wins_over_expired_and_capped() {
        let now = Utc::now();
        let mut promo = code(now);
        promo.is_active = false;
        promo.expires_at = Some(now - Duration::days(1));
        promo.max_uses = Some(1);
        promo.used_count = 1;
        assert_eq!(promo.check_redeemable(now), Err(PromoError::InactiveCode));
    }

    #[test]
    fn expired_wins_over_capped() {
        let now = Utc::now();
        let mut promo = code(now);
        promo.expires_at = Some(now);
        promo.max_uses = Some(1);
        promo.used_count = 1;
        assert_eq!(promo.check_redeemable(now), Err(PromoError::ExpiredCode));
    }

    #[test]
    fn cap_is_checked_last() {
        let now = Utc::now();
        let mut promo = code(now);
        promo.expires_at = Some(now + Duration::days(1));
        promo.max_uses = Some(2);
        promo.used_count = 1;
        assert_eq!(promo.check_redeemable(now), Ok(()));
        promo.used_count = 2;
        assert_eq!(promo.check_redeemable(now), Err(PromoError::UsageCapReached));
    }

    #[test]
    fn rejects_bad_catalog_input() {
        let now = Utc::now();
        let empty = NewPromoCode {
            code: "   ".into(),
            credits_amount: 5,
            expires_at: None,
            max_uses: None,
        };
        assert!(empty.into_promo_code(now).is_err());

        let zero = NewPromoCode {
            code: "X".into(),
            credits_amount: 0,
            expires_at: None,
            max_uses: None,
        };
        assert!(zero.into_promo_code(now).is_err());

        let no_uses = NewPromoCode {
            code: "X".into(),
            credits_amount: 5,
            expires_at: None,
            max_uses: Some(0),
        };
        assert!(no_uses.into_promo_code(now).is_err());
    }

    #[test]
    fn error_codes_match_serde_names() {
        for err in [
            PromoError::InvalidCode,
            PromoError::InactiveCode,
            PromoError::ExpiredCode,
            PromoError::UsageCapReached,
            PromoError::AlreadyRedeemed,
        ] {
            assert_eq!(serde_json::to_string(&err).unwrap(), format!("\"{}\"", err.code()));
        }
    }
}
