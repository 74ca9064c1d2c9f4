// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # YieldFlow Contracts
//!
//! The collaborators the ledger delegates to. Each implements one of the
//! capability traits defined in `yieldflow-protocol`:
//!
//! - **Reputation Badge**: a one-per-account badge registry behind
//!   [`yieldflow_protocol::badge::BadgeIssuer`]. Ids are sequential and never
//!   reused.
//! - **Lending Pool**: an in-process yield venue behind
//!   [`yieldflow_protocol::yield_venue::YieldVenue`], with a configurable APY,
//!   a pause switch, and explicit interest accrual.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. Nothing here wraps.
//! 2. Every state type is serializable so a node can snapshot it alongside
//!    the ledger.
//! 3. Interior mutability is a single `parking_lot::Mutex` per contract;
//!    no lock is held across a call into anything else.

pub mod lending_pool;
pub mod reputation_badge;

pub use lending_pool::{LendingPool, PoolSnapshot};
pub use reputation_badge::{Badge, BadgeRegistry, RegistrySnapshot};
