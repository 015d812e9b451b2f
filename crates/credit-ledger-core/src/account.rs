//! Account types for the credit ledger.
//!
//! An account carries the live balance together with the plan data the
//! monthly rollover needs (`monthly_allowance`, `reset_at`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

// ============================================================================
// Constants
// ============================================================================

/// Free plan monthly credit allowance.
pub const FREE_PLAN_CREDITS: i64 = 15;

/// Starter plan monthly credit allowance.
pub const STARTER_PLAN_CREDITS: i64 = 100;

/// Pro plan monthly credit allowance.
pub const PRO_PLAN_CREDITS: i64 = 400;

/// Studio plan monthly credit allowance.
pub const STUDIO_PLAN_CREDITS: i64 = 1500;

/// A credit account for one authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID (from the identity provider).
    pub account_id: AccountId,

    /// Current credit balance.
    pub balance: i64,

    /// Credits the balance is reset to at each monthly rollover.
    pub monthly_allowance: i64,

    /// When the last monthly rollover was applied, if ever.
    pub reset_at: Option<DateTime<Utc>>,

    /// Subscription plan.
    pub plan: Plan,

    /// Admin accounts bypass every balance check.
    pub is_admin: bool,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build a freshly opened account.
    ///
    /// The opening balance is the plan allowance plus the signup bonus, and the
    /// account counts as already rolled over for the current month.
    #[must_use]
    pub fn open(
        account_id: AccountId,
        plan: Plan,
        monthly_allowance: i64,
        signup_bonus: i64,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            balance: monthly_allowance + signup_bonus.max(0),
            monthly_allowance,
            reset_at: Some(now),
            plan,
            is_admin,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can pay `cost` right now.
    #[must_use]
    pub fn can_afford(&self, cost: i64) -> bool {
        self.is_admin || self.balance >= cost
    }
}

/// Available subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Default plan for every new account.
    Free,
    /// Entry paid plan.
    Starter,
    /// Mid-tier paid plan.
    Pro,
    /// Top paid plan.
    Studio,
}

impl Plan {
    /// The identifier used in storage and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Studio => "studio",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "studio" => Ok(Self::Studio),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

/// Monthly credit allowance per plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable(BTreeMap<Plan, i64>);

impl Default for PlanTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Plan::Free, FREE_PLAN_CREDITS),
            (Plan::Starter, STARTER_PLAN_CREDITS),
            (Plan::Pro, PRO_PLAN_CREDITS),
            (Plan::Studio, STUDIO_PLAN_CREDITS),
        ]))
    }
}

impl PlanTable {
    /// Monthly allowance for `plan`; a plan missing from the table gets nothing.
    #[must_use]
    pub fn allowance(&self, plan: Plan) -> i64 {
        self.0.get(&plan).copied().unwrap_or(0).max(0)
    }

    /// Override the allowance of one plan.
    #[must_use]
    pub fn with(mut self, plan: Plan, allowance: i64) -> Self {
        self.0.insert(plan, allowance);
        self
    }
}
