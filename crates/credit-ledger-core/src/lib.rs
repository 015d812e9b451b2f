//! Core types and utilities for the credit ledger.
//!
//! This crate provides the foundational types used throughout the ledger:
//!
//! - **Identifiers**: `AccountId`, `PromoCodeId`, `TransactionId`
//! - **Accounts**: `Account`, `Plan`, `PlanTable`
//! - **Credits**: `CreditTransaction`, `TransactionType`
//! - **Pricing**: `CostTable`, `FeatureCost`, `DurationTier`, `LedgerConfig`
//! - **Promo codes**: `PromoCode`, `PromoRedemption`, `PromoError`
//! - **Anonymous quota**: `AnonymousQuotaEntry`, `GenerationType`
//! - **Time**: `Clock`, calendar-month helpers
//!
//! # Credit Unit
//!
//! A credit is an abstract unit of billable usage, not a currency. Balances and
//! costs are stored as `i64` so a debit can be expressed as a negative amount.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod calendar;
pub mod credits;
pub mod error;
pub mod ids;
pub mod pricing;
pub mod promo;
pub mod quota;

pub use account::{Account, Plan, PlanTable};
pub use calendar::{month_start, same_calendar_month, Clock, ManualClock, SystemClock};
pub use credits::{CreditTransaction, NewTransaction, TransactionType};
pub use error::{LedgerError, Result};
pub use ids::{AccountId, IdError, PromoCodeId, TransactionId};
pub use pricing::{CostTable, CreditPacks, DurationTier, FeatureCost, LedgerConfig, ResolvedCost};
pub use promo::{NewPromoCode, PromoCode, PromoError, PromoRedemption};
pub use quota::{AnonymousQuotaEntry, GenerationType};
