//! Error types for ledger operations.
//!
//! Every ledger error is terminal for the operation that raised it. The
//! ledger never retries; callers re-issue with corrected input.

use thiserror::Error;

use crate::badge::BadgeError;
use crate::yield_venue::VenueError;

/// Errors returned by [`crate::Ledger`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Amounts must be strictly positive.
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// The account does not hold enough deposited funds.
    #[error("insufficient deposited balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// The account's deposited balance.
        available: u64,
        /// The amount that was requested.
        requested: u64,
    },

    /// A nested call reached the ledger while an external call was in flight.
    #[error("reentrant call rejected")]
    ReentrancyRejected,

    /// A badge operation named a badge the account does not own.
    #[error("badge {badge_id} is not owned by {account}")]
    NotOwner { account: String, badge_id: u64 },

    /// The presented capability was not issued by this ledger.
    #[error("capability not valid for this ledger")]
    Unauthorized,

    /// Crediting the account would overflow `u64`.
    #[error("balance overflow: current {current}, credit {credit}")]
    Overflow { current: u64, credit: u64 },

    /// The yield venue (or another external collaborator) failed.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl From<VenueError> for LedgerError {
    fn from(err: VenueError) -> Self {
        LedgerError::UpstreamFailure(err.to_string())
    }
}

impl From<BadgeError> for LedgerError {
    fn from(err: BadgeError) -> Self {
        match err {
            BadgeError::NotOwner { account, badge_id } => LedgerError::NotOwner {
                account: account.to_string(),
                badge_id: badge_id.value(),
            },
            other => LedgerError::UpstreamFailure(other.to_string()),
        }
    }
}
