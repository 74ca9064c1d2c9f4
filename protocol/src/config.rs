//! # Protocol Configuration & Constants
//!
//! Every default the ledger relies on lives here. The algorithms never read
//! these constants directly: they go through a [`LedgerConfig`], which a
//! node loads from its TOML file and which tests build by hand.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Reported by the node's `/status` endpoint and `version` subcommand.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// USDC carries six decimals. One whole dollar is `1_000_000` units.
pub const USDC_DECIMALS: u8 = 6;

/// Units per whole USDC.
pub const USDC_UNIT: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Reputation Policy Defaults
// ---------------------------------------------------------------------------

/// Reputation granted per deposit event, regardless of amount.
pub const DEFAULT_REPUTATION_PER_DEPOSIT: u64 = 1;

/// Score at which an account enters the Silver tier and earns its badge.
pub const DEFAULT_SILVER_THRESHOLD: u64 = 10;

/// Score at which an account enters the Gold tier.
pub const DEFAULT_GOLD_THRESHOLD: u64 = 50;

/// Score at which an account enters the Platinum tier.
pub const DEFAULT_PLATINUM_THRESHOLD: u64 = 100;

/// Spend bonus is `min(cap, score / divisor + 1)`.
pub const DEFAULT_SPEND_BONUS_DIVISOR: u64 = 10;

/// Upper bound on the reputation a single spend can earn.
pub const DEFAULT_SPEND_BONUS_CAP: u64 = 10;

/// Cashback percent is `min(cap, score / divisor + 1)`.
pub const DEFAULT_CASHBACK_DIVISOR: u64 = 20;

/// Upper bound on the cashback percent.
pub const DEFAULT_CASHBACK_CAP_PERCENT: u64 = 5;

/// How many ledger events are retained for activity queries.
pub const DEFAULT_ACTIVITY_HISTORY: usize = 1024;

/// Capacity of the live event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Gateway Defaults
// ---------------------------------------------------------------------------

/// Minimum reputation required for a fiat top-up.
pub const DEFAULT_MIN_TOPUP_REPUTATION: u64 = 1;

/// Requests allowed per caller per rate window.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 5;

/// Rate window length in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// The only currency the card processor accepts.
pub const DEFAULT_TOPUP_CURRENCY: &str = "USD";

/// Card references shorter than this are rejected outright.
pub const DEFAULT_MIN_CARD_REFERENCE_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default port for the gateway, JSON-RPC and WebSocket API.
pub const DEFAULT_RPC_PORT: u16 = 4000;

/// Default port for the Prometheus endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 4001;

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Errors raised while validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Tier thresholds must be strictly ascending and the first one non-zero.
    #[error("tier thresholds must be strictly ascending and non-zero: silver={silver}, gold={gold}, platinum={platinum}")]
    UnorderedTiers {
        silver: u64,
        gold: u64,
        platinum: u64,
    },

    /// A divisor of zero would make the reward curve undefined.
    #[error("{0} must be greater than zero")]
    ZeroDivisor(&'static str),
}

/// Reputation scores at which an account enters each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub silver: u64,
    pub gold: u64,
    pub platinum: u64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            silver: DEFAULT_SILVER_THRESHOLD,
            gold: DEFAULT_GOLD_THRESHOLD,
            platinum: DEFAULT_PLATINUM_THRESHOLD,
        }
    }
}

/// Tunable ledger policy.
///
/// Every field has a default so a partial `[ledger]` table in the node's
/// TOML file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Reputation added by every successful deposit.
    pub reputation_per_deposit: u64,
    /// Tier boundaries. Reaching `silver` mints the account's badge.
    pub tiers: TierThresholds,
    /// Spend bonus curve: `min(spend_bonus_cap, score / spend_bonus_divisor + 1)`.
    pub spend_bonus_divisor: u64,
    pub spend_bonus_cap: u64,
    /// Cashback curve: `min(cashback_cap_percent, score / cashback_divisor + 1)`.
    pub cashback_divisor: u64,
    pub cashback_cap_percent: u64,
    /// Number of events kept for `recent_activity`.
    pub activity_history: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reputation_per_deposit: DEFAULT_REPUTATION_PER_DEPOSIT,
            tiers: TierThresholds::default(),
            spend_bonus_divisor: DEFAULT_SPEND_BONUS_DIVISOR,
            spend_bonus_cap: DEFAULT_SPEND_BONUS_CAP,
            cashback_divisor: DEFAULT_CASHBACK_DIVISOR,
            cashback_cap_percent: DEFAULT_CASHBACK_CAP_PERCENT,
            activity_history: DEFAULT_ACTIVITY_HISTORY,
        }
    }
}

impl LedgerConfig {
    /// Checks the invariants the reward curves depend on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let TierThresholds {
            silver,
            gold,
            platinum,
        } = self.tiers;
        if silver == 0 || silver >= gold || gold >= platinum {
            return Err(ConfigError::UnorderedTiers {
                silver,
                gold,
                platinum,
            });
        }
        if self.spend_bonus_divisor == 0 {
            return Err(ConfigError::ZeroDivisor("spend_bonus_divisor"));
        }
        if self.cashback_divisor == 0 {
            return Err(ConfigError::ZeroDivisor("cashback_divisor"));
        }
        Ok(())
    }
}
