//! Reputation tiers and the reward curves derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{LedgerConfig, TierThresholds};

/// Card tier, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Classic,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    /// The tier a score falls into.
    pub fn for_score(score: u64, tiers: &TierThresholds) -> Self {
        if score >= tiers.platinum {
            Tier::Platinum
        } else if score >= tiers.gold {
            Tier::Gold
        } else if score >= tiers.silver {
            Tier::Silver
        } else {
            Tier::Classic
        }
    }

    /// The next tier up and the score needed to reach it.
    pub fn next(self, tiers: &TierThresholds) -> Option<(Tier, u64)> {
        match self {
            Tier::Classic => Some((Tier::Silver, tiers.silver)),
            Tier::Silver => Some((Tier::Gold, tiers.gold)),
            Tier::Gold => Some((Tier::Platinum, tiers.platinum)),
            Tier::Platinum => None,
        }
    }

    /// Whether an account in this tier is entitled to a badge.
    pub fn earns_badge(self) -> bool {
        self >= Tier::Silver
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Classic => write!(f, "Classic"),
            Tier::Silver => write!(f, "Silver"),
            Tier::Gold => write!(f, "Gold"),
            Tier::Platinum => write!(f, "Platinum"),
        }
    }
}

/// Reputation earned by a spend, computed from the score before the spend.
pub fn spend_bonus(score: u64, config: &LedgerConfig) -> u64 {
    (score / config.spend_bonus_divisor)
        .saturating_add(1)
        .min(config.spend_bonus_cap)
}

/// Cashback percent offered at a given score.
pub fn cashback_percent(score: u64, config: &LedgerConfig) -> u64 {
    (score / config.cashback_divisor)
        .saturating_add(1)
        .min(config.cashback_cap_percent)
}

/// Everything a client needs to render an account's tier card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPerks {
    pub tier: Tier,
    pub cashback_percent: u64,
    pub spend_bonus: u64,
    /// The next tier, if any.
    pub next_tier: Option<Tier>,
    /// Reputation still needed to reach `next_tier`.
    pub reputation_to_next: Option<u64>,
}

impl TierPerks {
    pub fn for_score(score: u64, config: &LedgerConfig) -> Self {
        let tier = Tier::for_score(score, &config.tiers);
        let next = tier.next(&config.tiers);
        Self {
            tier,
            cashback_percent: cashback_percent(score, config),
            spend_bonus: spend_bonus(score, config),
            next_tier: next.map(|(t, _)| t),
            reputation_to_next: next.map(|(_, at)| at.saturating_sub(score)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_default_thresholds() {
        let tiers = TierThresholds::default();
        assert_eq!(Tier::for_score(0, &tiers), Tier::Classic);
        assert_eq!(Tier::for_score(9, &tiers), Tier::Classic);
        assert_eq!(Tier::for_score(10, &tiers), Tier::Silver);
        assert_eq!(Tier::for_score(49, &tiers), Tier::Silver);
        assert_eq!(Tier::for_score(50, &tiers), Tier::Gold);
        assert_eq!(Tier::for_score(100, &tiers), Tier::Platinum);
        assert_eq!(Tier::for_score(u64::MAX, &tiers), Tier::Platinum);
    }

    #[test]
    fn spend_bonus_curve() {
        let config = LedgerConfig::default();
        assert_eq!(spend_bonus(0, &config), 1);
        assert_eq!(spend_bonus(9, &config), 1);
        assert_eq!(spend_bonus(10, &config), 2);
        assert_eq!(spend_bonus(95, &config), 10);
        assert_eq!(spend_bonus(10_000, &config), 10);
    }

    #[test]
    fn cashback_caps_at_five_percent() {
        let config = LedgerConfig::default();
        assert_eq!(cashback_percent(0, &config), 1);
        assert_eq!(cashback_percent(20, &config), 2);
        assert_eq!(cashback_percent(1_000, &config), 5);
    }

    #[test]
    fn perks_report_distance_to_next_tier() {
        let config = LedgerConfig::default();
        let perks = TierPerks::for_score(42, &config);
        assert_eq!(perks.tier, Tier::Silver);
        assert_eq!(perks.next_tier, Some(Tier::Gold));
        assert_eq!(perks.reputation_to_next, Some(8));

        let top = TierPerks::for_score(150, &config);
        assert_eq!(top.next_tier, None);
        assert_eq!(top.reputation_to_next, None);
    }
}
