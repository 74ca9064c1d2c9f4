// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # YieldFlow Protocol: Core Library
//!
//! The ledger at the center of YieldFlow: custodial USDC balances that earn
//! yield in a pooled lending venue, can be spent or withdrawn, and build a
//! reputation score that unlocks tiers, perks and a badge.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants and the tunable [`config::LedgerConfig`].
//! - **account**: Account keys and per-account records.
//! - **ledger**: The balance & reputation state machine.
//! - **badge**: The capability the ledger uses to mint and burn badges.
//! - **yield_venue**: The capability the ledger uses to place funds in a pool.
//! - **zkp**: Pluggable zero-knowledge proof verification.
//! - **storage**: sled-backed snapshots so a node survives restarts.
//!
//! ## Ground Rules
//!
//! 1. Amounts are `u64` in the smallest currency unit. Every add is checked.
//! 2. State is mutated before any external call, and rolled back if the
//!    call fails. Nothing half-applied is ever observable.
//! 3. Privileged operations take a capability argument. There is no ambient
//!    "admin" anywhere.

pub mod account;
pub mod badge;
pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod yield_venue;
pub mod zkp;

pub use account::{Account, AccountId};
pub use error::LedgerError;
pub use ledger::{AdminCapability, Ledger, LedgerEvent, LedgerState};
