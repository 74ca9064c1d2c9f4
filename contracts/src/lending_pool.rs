//! # Lending Pool
//!
//! An in-process stand-in for a pooled lending market. Deposits from the
//! ledger become per-account positions; interest accrues on principal at a
//! fixed APY when [`LendingPool::accrue`] is called. Nothing here runs on a
//! timer: the node decides when time passes.
//!
//! ## Interest
//!
//! Simple interest per accrual step:
//!
//! ```text
//! interest = principal * apy_bps * elapsed_secs / (10_000 * SECONDS_PER_YEAR)
//! ```
//!
//! The integer remainder of each step is carried per position, so many
//! short steps earn the same as one long step.
//!
//! ## Liquidity
//!
//! Supplied funds are pool cash. [`LendingPool::borrow`] lends some of it
//! out; a withdrawal that needs more cash than the pool holds fails with
//! [`VenueError::InsufficientLiquidity`] until borrowers repay.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use yieldflow_protocol::yield_venue::{VenueError, YieldVenue};
use yieldflow_protocol::AccountId;

/// Seconds in a 365-day year.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// A single account's stake in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub principal: u64,
    /// Interest earned so far. Informational; never withdrawable.
    pub accrued: u64,
    /// Sub-unit interest carried between accrual steps.
    carry: u128,
}

/// Persistent form of a [`LendingPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub apy_bps: u32,
    pub paused: bool,
    pub cash: u64,
    pub borrowed: u64,
    pub positions: Vec<(AccountId, Position)>,
}

#[derive(Debug, Default)]
struct PoolState {
    paused: bool,
    cash: u64,
    borrowed: u64,
    positions: HashMap<AccountId, Position>,
}

/// In-process yield venue.
#[derive(Debug)]
pub struct LendingPool {
    apy_bps: u32,
    state: Mutex<PoolState>,
}

impl LendingPool {
    pub fn new(apy_bps: u32) -> Self {
        Self {
            apy_bps,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn restore(snapshot: PoolSnapshot) -> Self {
        Self {
            apy_bps: snapshot.apy_bps,
            state: Mutex::new(PoolState {
                paused: snapshot.paused,
                cash: snapshot.cash,
                borrowed: snapshot.borrowed,
                positions: snapshot.positions.into_iter().collect(),
            }),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        let mut positions: Vec<_> = state
            .positions
            .iter()
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        PoolSnapshot {
            apy_bps: self.apy_bps,
            paused: state.paused,
            cash: state.cash,
            borrowed: state.borrowed,
            positions,
        }
    }

    pub fn apy_bps(&self) -> u32 {
        self.apy_bps
    }

    /// While paused, supply and withdraw fail. Reads still work.
    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
        info!(paused, "lending pool pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Cash on hand, available for withdrawals.
    pub fn cash(&self) -> u64 {
        self.state.lock().cash
    }

    pub fn position(&self, account: &AccountId) -> Option<Position> {
        self.state.lock().positions.get(account).cloned()
    }

    /// Lends `amount` of pool cash to an outside borrower.
    pub fn borrow(&self, amount: u64) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        if amount > state.cash {
            return Err(VenueError::InsufficientLiquidity {
                available: state.cash,
                requested: amount,
            });
        }
        state.cash -= amount;
        state.borrowed += amount;
        Ok(())
    }

    /// Returns borrowed cash to the pool. Repaying more than is owed is an error.
    pub fn repay(&self, amount: u64) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        if amount > state.borrowed {
            return Err(VenueError::Failed(format!(
                "repayment {amount} exceeds outstanding {}",
                state.borrowed
            )));
        }
        state.borrowed -= amount;
        state.cash += amount;
        Ok(())
    }

    /// Accrues simple interest on every position for `elapsed`.
    /// Returns the interest credited across all positions in this step.
    pub fn accrue(&self, elapsed: Duration) -> u64 {
        let denominator = (BPS_DENOMINATOR as u128) * (SECONDS_PER_YEAR as u128);
        let rate = self.apy_bps as u128 * elapsed.as_secs() as u128;
        let mut credited = 0u64;

        let mut state = self.state.lock();
        for position in state.positions.values_mut() {
            let numerator = position.principal as u128 * rate + position.carry;
            let interest = u64::try_from(numerator / denominator).unwrap_or(u64::MAX);
            position.carry = numerator % denominator;
            position.accrued = position.accrued.saturating_add(interest);
            credited = credited.saturating_add(interest);
        }

        debug!(secs = elapsed.as_secs(), credited, "interest accrued");
        credited
    }
}

impl YieldVenue for LendingPool {
    fn supply(&self, account: &AccountId, amount: u64) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        if state.paused {
            return Err(VenueError::Paused);
        }
        let cash = state
            .cash
            .checked_add(amount)
            .ok_or_else(|| VenueError::Failed("pool cash overflow".into()))?;
        let principal = state
            .positions
            .get(account)
            .map_or(0, |p| p.principal)
            .checked_add(amount)
            .ok_or_else(|| VenueError::Failed("position overflow".into()))?;
        state.positions.entry(account.clone()).or_default().principal = principal;
        state.cash = cash;

        debug!(%account, amount, "supplied");
        Ok(())
    }

    fn withdraw(&self, account: &AccountId, amount: u64) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        if state.paused {
            return Err(VenueError::Paused);
        }
        let principal = state.positions.get(account).map_or(0, |p| p.principal);
        if amount > principal {
            return Err(VenueError::Failed(format!(
                "withdrawal {amount} exceeds position {principal}"
            )));
        }
        if amount > state.cash {
            return Err(VenueError::InsufficientLiquidity {
                available: state.cash,
                requested: amount,
            });
        }
        state.cash -= amount;
        if let Some(position) = state.positions.get_mut(account) {
            position.principal -= amount;
        }

        debug!(%account, amount, "withdrawn");
        Ok(())
    }

    fn accrued_yield(&self, account: &AccountId) -> Result<u64, VenueError> {
        Ok(self
            .state
            .lock()
            .positions
            .get(account)
            .map_or(0, |p| p.accrued))
    }

    fn total_yield(&self) -> Result<u64, VenueError> {
        Ok(self
            .state
            .lock()
            .positions
            .values()
            .fold(0u64, |sum, p| sum.saturating_add(p.accrued)))
    }
}
