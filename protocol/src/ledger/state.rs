//! Account table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountId};

/// Every account record the ledger knows about.
///
/// This is also the snapshot format: a node persists it and hands it back
/// to [`super::LedgerBuilder::restore`] on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    /// Sequence number of the last event committed before the snapshot.
    #[serde(default)]
    last_event_seq: u64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The account's record, or the zero record if unseen.
    pub fn account(&self, id: &AccountId) -> Account {
        self.accounts.get(id).cloned().unwrap_or_default()
    }

    pub fn get(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn get_mut(&mut self, id: &AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(id)
    }

    /// The account's record, created as the zero record if unseen.
    pub fn entry(&mut self, id: &AccountId) -> &mut Account {
        self.accounts.entry(id.clone()).or_default()
    }

    /// Stores `account`, returning the previous record.
    pub fn insert(&mut self, id: AccountId, account: Account) -> Option<Account> {
        self.accounts.insert(id, account)
    }

    pub fn remove(&mut self, id: &AccountId) -> Option<Account> {
        self.accounts.remove(id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Account)> {
        self.accounts.iter()
    }

    /// Sum of all deposited balances.
    pub fn total_deposited(&self) -> u128 {
        self.accounts
            .values()
            .map(|a| a.deposited_balance as u128)
            .sum()
    }

    pub fn last_event_seq(&self) -> u64 {
        self.last_event_seq
    }

    pub(crate) fn set_last_event_seq(&mut self, seq: u64) {
        self.last_event_seq = seq;
    }
}
