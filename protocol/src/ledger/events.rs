//! Ledger events and the bounded activity log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::badge::BadgeId;

use super::reputation::Tier;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEventKind {
    Deposited { amount: u64 },
    Withdrawn { amount: u64 },
    Spent { amount: u64, purpose: String },
    ReputationChanged { old: u64, new: u64 },
    BadgeMinted { badge_id: BadgeId, tier: Tier },
    BadgeBurned { badge_id: BadgeId },
}

impl LedgerEventKind {
    /// Short lowercase name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEventKind::Deposited { .. } => "deposited",
            LedgerEventKind::Withdrawn { .. } => "withdrawn",
            LedgerEventKind::Spent { .. } => "spent",
            LedgerEventKind::ReputationChanged { .. } => "reputation_changed",
            LedgerEventKind::BadgeMinted { .. } => "badge_minted",
            LedgerEventKind::BadgeBurned { .. } => "badge_burned",
        }
    }
}

/// A committed state change, in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Monotonic per-ledger sequence number, starting at 1.
    pub seq: u64,
    pub account: AccountId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LedgerEventKind,
}

/// Ring buffer of the most recent events.
#[derive(Debug)]
pub(crate) struct ActivityLog {
    capacity: usize,
    next_seq: u64,
    events: VecDeque<LedgerEvent>,
}

impl ActivityLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 1,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Stamps and stores an event, evicting the oldest if full.
    pub(crate) fn record(&mut self, account: &AccountId, kind: LedgerEventKind) -> LedgerEvent {
        let event = LedgerEvent {
            seq: self.next_seq,
            account: account.clone(),
            at: Utc::now(),
            kind,
        };
        self.next_seq += 1;
        if self.capacity > 0 {
            if self.events.len() == self.capacity {
                self.events.pop_front();
            }
            self.events.push_back(event.clone());
        }
        event
    }

    /// Up to `limit` most recent events, newest first, optionally for one account.
    pub(crate) fn recent(&self, account: Option<&AccountId>, limit: usize) -> Vec<LedgerEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| account.map_or(true, |a| &e.account == a))
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Continues numbering after a restore.
    pub(crate) fn resume_from(&mut self, last_seq: u64) {
        self.next_seq = last_seq.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountId {
        AccountId::parse("0x00000000000000000000000000000000000a11ce").unwrap()
    }

    fn bob() -> AccountId {
        AccountId::parse("0x0000000000000000000000000000000000000b0b").unwrap()
    }

    #[test]
    fn sequence_is_monotonic() {
        let mut log = ActivityLog::new(8);
        let a = log.record(&alice(), LedgerEventKind::Deposited { amount: 1 });
        let b = log.record(&alice(), LedgerEventKind::Withdrawn { amount: 1 });
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(log.last_seq(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut log = ActivityLog::new(2);
        for amount in 1..=3 {
            log.record(&alice(), LedgerEventKind::Deposited { amount });
        }
        let recent = log.recent(None, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, LedgerEventKind::Deposited { amount: 3 });
        assert_eq!(recent[1].kind, LedgerEventKind::Deposited { amount: 2 });
    }

    #[test]
    fn filters_by_account() {
        let mut log = ActivityLog::new(8);
        log.record(&alice(), LedgerEventKind::Deposited { amount: 1 });
        log.record(&bob(), LedgerEventKind::Deposited { amount: 2 });
        let only_bob = log.recent(Some(&bob()), 10);
        assert_eq!(only_bob.len(), 1);
        assert_eq!(only_bob[0].account, bob());
    }

    #[test]
    fn serializes_flat_with_type_tag() {
        let mut log = ActivityLog::new(1);
        let event = log.record(
            &alice(),
            LedgerEventKind::Spent {
                amount: 5,
                purpose: "coffee".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "spent");
        assert_eq!(json["purpose"], "coffee");
        assert_eq!(json["seq"], 1);
    }
}
