//! # Yield Venue Capability
//!
//! Deposited funds are placed in an external lending pool. The ledger only
//! relies on success or failure of each call: it never assumes settlement
//! timing, and accrued yield is informational. It is not part of any
//! account's withdrawable balance.

use thiserror::Error;

use crate::account::AccountId;

/// Errors a yield venue can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    /// The venue is not accepting operations.
    #[error("venue paused")]
    Paused,

    /// The venue cannot return the requested funds right now.
    #[error("insufficient venue liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity { available: u64, requested: u64 },

    /// The venue failed for a reason the ledger cannot interpret.
    #[error("venue call failed: {0}")]
    Failed(String),
}

/// The operations the ledger needs from a lending pool.
pub trait YieldVenue: Send + Sync {
    /// Places `amount` in the pool on behalf of `account`.
    fn supply(&self, account: &AccountId, amount: u64) -> Result<(), VenueError>;

    /// Pulls `amount` out of the pool on behalf of `account`.
    fn withdraw(&self, account: &AccountId, amount: u64) -> Result<(), VenueError>;

    /// Yield accrued for `account` so far.
    fn accrued_yield(&self, account: &AccountId) -> Result<u64, VenueError>;

    /// Yield accrued across every account.
    fn total_yield(&self) -> Result<u64, VenueError>;
}
