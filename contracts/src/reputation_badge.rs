//! # Reputation Badge Registry
//!
//! One badge per account, minted when the account reaches the badge tier.
//! The registry never decides *when* to mint; the ledger does, and proves
//! it with the [`MinterCapability`] only it holds.
//!
//! ## Id Allocation
//!
//! Ids start at 1 and increase by one per mint. A burned id is retired:
//! re-minting for the same account later allocates a fresh id, so an id
//! always names exactly one issuance.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use yieldflow_protocol::badge::{BadgeError, BadgeId, BadgeIssuer, MinterCapability};
use yieldflow_protocol::ledger::Tier;
use yieldflow_protocol::AccountId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A live badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: BadgeId,
    pub owner: AccountId,
    /// Tier the account had reached when the badge was minted.
    pub tier: Tier,
    pub minted_at: DateTime<Utc>,
}

/// Persistent form of a [`BadgeRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Id the next mint will receive.
    pub next_id: u64,
    pub badges: Vec<Badge>,
}

#[derive(Debug)]
struct RegistryState {
    next_id: u64,
    badges: BTreeMap<BadgeId, Badge>,
    by_owner: HashMap<AccountId, BadgeId>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 1,
            badges: BTreeMap::new(),
            by_owner: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// BadgeRegistry
// ---------------------------------------------------------------------------

/// In-process badge registry.
#[derive(Debug, Default)]
pub struct BadgeRegistry {
    state: Mutex<RegistryState>,
}

impl BadgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from a snapshot. The id counter never moves
    /// backwards, even if the snapshot's counter is stale.
    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        let mut state = RegistryState::default();
        let highest = snapshot.badges.iter().map(|b| b.id.value()).max().unwrap_or(0);
        state.next_id = snapshot.next_id.max(highest + 1).max(1);
        for badge in snapshot.badges {
            state.by_owner.insert(badge.owner.clone(), badge.id);
            state.badges.insert(badge.id, badge);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            next_id: state.next_id,
            badges: state.badges.values().cloned().collect(),
        }
    }

    pub fn badge(&self, id: BadgeId) -> Option<Badge> {
        self.state.lock().badges.get(&id).cloned()
    }

    pub fn owner_of(&self, id: BadgeId) -> Option<AccountId> {
        self.state.lock().badges.get(&id).map(|b| b.owner.clone())
    }

    /// Badges ever minted, including burned ones.
    pub fn total_minted(&self) -> u64 {
        self.state.lock().next_id - 1
    }

    /// Badges currently live.
    pub fn total_supply(&self) -> u64 {
        self.state.lock().badges.len() as u64
    }
}

impl BadgeIssuer for BadgeRegistry {
    fn mint(
        &self,
        _cap: &MinterCapability,
        account: &AccountId,
        tier: Tier,
    ) -> Result<BadgeId, BadgeError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.by_owner.get(account) {
            return Ok(*existing);
        }

        let id = BadgeId::new(state.next_id);
        state.next_id = state
            .next_id
            .checked_add(1)
            .ok_or_else(|| BadgeError::Unavailable("badge id space exhausted".into()))?;
        state.by_owner.insert(account.clone(), id);
        state.badges.insert(
            id,
            Badge {
                id,
                owner: account.clone(),
                tier,
                minted_at: Utc::now(),
            },
        );

        info!(%account, badge_id = %id, %tier, "badge minted");
        Ok(id)
    }

    fn burn(
        &self,
        _cap: &MinterCapability,
        account: &AccountId,
        badge_id: BadgeId,
    ) -> Result<(), BadgeError> {
        let mut state = self.state.lock();
        if state.by_owner.get(account) != Some(&badge_id) {
            return Err(BadgeError::NotOwner {
                account: account.clone(),
                badge_id,
            });
        }
        state.by_owner.remove(account);
        state.badges.remove(&badge_id);

        info!(%account, %badge_id, "badge burned");
        Ok(())
    }

    fn badge_of(&self, account: &AccountId) -> Option<BadgeId> {
        self.state.lock().by_owner.get(account).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
