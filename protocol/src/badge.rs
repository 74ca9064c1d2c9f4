//! # Badge Issuer Capability
//!
//! Badges are one-per-account non-fungible markers of tier achievement. The
//! registry that stores them lives outside this crate; the ledger talks to
//! it through [`BadgeIssuer`].
//!
//! Minting and burning require a [`MinterCapability`]. Its constructor is
//! private to this crate and the only instance is owned by the ledger, so
//! no client can mint or burn a badge except through a ledger operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::AccountId;
use crate::ledger::Tier;

/// Token id of a badge. Allocated sequentially, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BadgeId(u64);

impl BadgeId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BadgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors a badge issuer can report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadgeError {
    /// `badge_id` is not currently bound to `account`.
    #[error("badge {badge_id} is not owned by {account}")]
    NotOwner {
        account: AccountId,
        badge_id: BadgeId,
    },

    /// The issuer could not be reached or refused the operation.
    #[error("badge issuer unavailable: {0}")]
    Unavailable(String),
}

/// Proof that the caller is allowed to mint and burn badges.
///
/// Deliberately not `Clone`: the ledger holds the single instance.
#[derive(Debug)]
pub struct MinterCapability {
    _sealed: (),
}

impl MinterCapability {
    pub(crate) fn new() -> Self {
        Self { _sealed: () }
    }

    /// Lets downstream test suites exercise an issuer directly.
    #[cfg(feature = "testing")]
    pub fn for_testing() -> Self {
        Self::new()
    }
}

/// The operations the ledger needs from a badge registry.
pub trait BadgeIssuer: Send + Sync {
    /// Mints a badge for `account`. Idempotent: if the account already
    /// holds a badge, returns that badge's id and changes nothing.
    fn mint(
        &self,
        cap: &MinterCapability,
        account: &AccountId,
        tier: Tier,
    ) -> Result<BadgeId, BadgeError>;

    /// Removes the binding between `account` and `badge_id`.
    fn burn(
        &self,
        cap: &MinterCapability,
        account: &AccountId,
        badge_id: BadgeId,
    ) -> Result<(), BadgeError>;

    /// The badge currently bound to `account`, if any.
    fn badge_of(&self, account: &AccountId) -> Option<BadgeId>;
}
