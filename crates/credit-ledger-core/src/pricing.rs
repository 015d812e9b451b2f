//! Pricing configuration for the credit ledger.
//!
//! This module defines what each billable feature costs, how much each plan
//! grants per month, and the other static values the ledger reads at startup.

use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::PlanTable;

/// Credits granted once when an account is opened.
pub const DEFAULT_SIGNUP_BONUS: i64 = 5;

/// Free image generations per IP per calendar month for anonymous callers.
pub const DEFAULT_FREE_TIER_LIMIT: u32 = 3;

/// Cost of a feature: a flat price or a set of duration tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCost {
    /// One price regardless of the request.
    Fixed(i64),
    /// Duration-bucketed prices, ordered by `max_seconds`.
    Tiered(Vec<DurationTier>),
}

/// One bucket of a duration-tiered feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationTier {
    /// Cost-table entry name (e.g. `video_10s`).
    pub entry: String,
    /// Longest duration this tier covers, in seconds.
    pub max_seconds: u32,
    /// Credits charged for this tier.
    pub credits: i64,
}

impl DurationTier {
    /// Create a tier.
    #[must_use]
    pub fn new(entry: impl Into<String>, max_seconds: u32, credits: i64) -> Self {
        Self {
            entry: entry.into(),
            max_seconds,
            credits,
        }
    }
}

/// The outcome of looking a feature up in the [`CostTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCost {
    /// The cost-table entry that matched (`video_10s`), or the raw feature.
    pub entry: String,
    /// Credits to charge.
    pub credits: i64,
    /// Whether the feature exists in the table at all.
    pub known: bool,
}

/// Static mapping from feature identifier to credit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTable(BTreeMap<String, FeatureCost>);

impl Default for CostTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("image".to_string(), FeatureCost::Fixed(1)),
            (
                "video".to_string(),
                FeatureCost::Tiered(vec![
                    DurationTier::new("video_5s", 5, 10),
                    DurationTier::new("video_10s", 10, 20),
                    DurationTier::new("video_30s", 30, 50),
                ]),
            ),
            ("narration".to_string(), FeatureCost::Fixed(2)),
            ("text_suggestion".to_string(), FeatureCost::Fixed(1)),
            ("chat".to_string(), FeatureCost::Fixed(1)),
        ]))
    }
}

impl CostTable {
    /// Credits for `feature`; see [`CostTable::resolve`].
    #[must_use]
    pub fn resolve_cost(&self, feature: &str, duration_seconds: Option<u32>) -> i64 {
        self.resolve(feature, duration_seconds).credits
    }

    /// Look a feature up.
    ///
    /// Tiered features take the smallest tier whose `max_seconds` covers the
    /// requested duration, falling back to the largest tier; a missing duration
    /// picks the smallest tier. Unknown features cost nothing and are logged.
    #[must_use]
    pub fn resolve(&self, feature: &str, duration_seconds: Option<u32>) -> ResolvedCost {
        match self.0.get(feature) {
            Some(FeatureCost::Fixed(credits)) => ResolvedCost {
                entry: feature.to_string(),
                credits: *credits,
                known: true,
            },
            Some(FeatureCost::Tiered(tiers)) => {
                let duration = duration_seconds.unwrap_or(0);
                let mut sorted: Vec<&DurationTier> = tiers.iter().collect();
                sorted.sort_by_key(|t| t.max_seconds);

                let tier = sorted
                    .iter()
                    .find(|t| duration <= t.max_seconds)
                    .or_else(|| sorted.last());

                match tier {
                    Some(tier) => ResolvedCost {
                        entry: tier.entry.clone(),
                        credits: tier.credits,
                        known: true,
                    },
                    None => {
                        tracing::warn!(feature = %feature, "Tiered feature has no tiers; treating as free");
                        ResolvedCost {
                            entry: feature.to_string(),
                            credits: 0,
                            known: false,
                        }
                    }
                }
            }
            None => {
                tracing::warn!(feature = %feature, "Unknown feature; treating as free");
                ResolvedCost {
                    entry: feature.to_string(),
                    credits: 0,
                    known: false,
                }
            }
        }
    }

    /// Replace or add the cost of one feature.
    #[must_use]
    pub fn with(mut self, feature: impl Into<String>, cost: FeatureCost) -> Self {
        self.0.insert(feature.into(), cost);
        self
    }
}

/// One-time credit packs sold through the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditPacks(BTreeMap<String, i64>);

impl Default for CreditPacks {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("small".to_string(), 50),
            ("medium".to_string(), 150),
            ("large".to_string(), 500),
        ]))
    }
}

impl CreditPacks {
    /// Credits granted by `pack`, if it exists.
    #[must_use]
    pub fn credits(&self, pack: &str) -> Option<i64> {
        self.0.get(pack).copied()
    }
}

/// Static configuration consumed by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Feature costs.
    pub costs: CostTable,
    /// Monthly allowance per plan.
    pub plans: PlanTable,
    /// Credits granted when an account is opened.
    pub signup_bonus: i64,
    /// Anonymous free image generations per IP per month.
    pub free_tier_limit: u32,
    /// Purchasable credit packs.
    pub credit_packs: CreditPacks,
    /// Reference timezone for calendar-month boundaries.
    pub timezone: Tz,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            costs: CostTable::default(),
            plans: PlanTable::default(),
            signup_bonus: DEFAULT_SIGNUP_BONUS,
            free_tier_limit: DEFAULT_FREE_TIER_LIMIT,
            credit_packs: CreditPacks::default(),
            timezone: Tz::UTC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_features_resolve_to_their_price() {
        let table = CostTable::default();
        assert_eq!(table.resolve_cost("image", None), 1);
        assert_eq!(table.resolve_cost("narration", Some(90)), 2);
        assert_eq!(table.resolve_cost("chat", None), 1);
    }

    #[test]
    fn video_buckets_into_smallest_covering_tier() {
        let table = CostTable::default();
        assert_eq!(table.resolve("video", Some(5)).entry, "video_5s");
        assert_eq!(table.resolve("video", Some(7)).entry, "video_10s");
        assert_eq!(table.resolve("video", Some(10)).entry, "video_10s");
        assert_eq!(table.resolve("video", Some(45)).entry, "video_30s");
        assert_eq!(table.resolve_cost("video", Some(7)), 20);
        assert_eq!(table.resolve_cost("video", Some(45)), 50);
    }

    #[test]
    fn video_without_duration_uses_smallest_tier() {
        let table = CostTable::default();
        assert_eq!(table.resolve("video", None).entry, "video_5s");
    }

    #[test]
    fn unknown_feature_is_free() {
        let resolved = CostTable::default().resolve("hologram", None);
        assert_eq!(resolved.credits, 0);
        assert!(!resolved.known);
        assert_eq!(resolved.entry, "hologram");
    }

    #[test]
    fn tiers_are_sorted_before_bucketing() {
        let table = CostTable::default().with(
            "video",
            FeatureCost::Tiered(vec![
                DurationTier::new("long", 60, 100),
                DurationTier::new("short", 15, 30),
            ]),
        );
        assert_eq!(table.resolve("video", Some(10)).entry, "short");
        assert_eq!(table.resolve("video", Some(20)).entry, "long");
        assert_eq!(table.resolve("video", Some(600)).entry, "long");
    }

    #[test]
    fn ledger_config_fills_missing_fields_from_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"signup_bonus": 0, "timezone": "Europe/Paris"}"#).unwrap();
        assert_eq!(config.signup_bonus, 0);
        assert_eq!(config.free_tier_limit, DEFAULT_FREE_TIER_LIMIT);
        assert_eq!(config.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.costs, CostTable::default());
    }

    #[test]
    fn cost_table_deserializes_tiers() {
        let table: CostTable = serde_json::from_str(
            r#"{"image": {"fixed": 3}, "video": {"tiered": [{"entry": "v", "max_seconds": 8, "credits": 9}]}}"#,
        )
        .unwrap();
        assert_eq!(table.resolve_cost("image", None), 3);
        assert_eq!(table.resolve_cost("video", Some(100)), 9);
    }

    #[test]
    fn credit_packs_lookup() {
        let packs = CreditPacks::default();
        assert_eq!(packs.credits("medium"), Some(150));
        assert_eq!(packs.credits("huge"), None);
    }
}
