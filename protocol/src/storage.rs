//! # LedgerStore: Snapshot Persistence
//!
//! Built on sled's embedded key-value store. The ledger itself is purely
//! in-memory; a node periodically writes a [`LedgerState`] snapshot here
//! and reads it back on start.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                   | Value              |
//! |------------|-----------------------|--------------------|
//! | `accounts` | account key (UTF-8)   | `bincode(Account)` |
//! | `metadata` | key (UTF-8)           | `bincode(T)`       |
//!
//! Collaborators that keep their own state (the badge registry, the lending
//! pool) store their snapshots in `metadata` under a key of their choosing.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};

use crate::account::{Account, AccountId};
use crate::ledger::LedgerState;

/// Errors that can occur while reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt account key: {0}")]
    CorruptKey(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata key for the last committed event sequence number.
const META_LAST_EVENT_SEQ: &[u8] = b"last_event_seq";

/// Persistent home for ledger snapshots.
///
/// Cheap to clone; every clone shares the same sled handle.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: Db,
    accounts: Tree,
    metadata: Tree,
}

impl LedgerStore {
    /// Opens or creates a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store, dropped with the handle. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let accounts = db.open_tree("accounts")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            accounts,
            metadata,
        })
    }

    /// Replaces the stored account table with `state` and flushes.
    pub fn save_ledger(&self, state: &LedgerState) -> StoreResult<()> {
        let mut batch = Batch::default();
        for key in self.accounts.iter().keys() {
            let key = key?;
            let stale = std::str::from_utf8(&key)
                .ok()
                .and_then(|raw| AccountId::parse(raw).ok())
                .map_or(true, |id| state.get(&id).is_none());
            if stale {
                batch.remove(key);
            }
        }
        for (id, account) in state.iter() {
            batch.insert(id.as_str().as_bytes(), encode(account)?);
        }
        self.accounts.apply_batch(batch)?;
        self.put_meta(META_LAST_EVENT_SEQ, &state.last_event_seq())?;
        self.db.flush()?;
        Ok(())
    }

    /// Reads back the last saved account table. Empty if nothing was saved.
    pub fn load_ledger(&self) -> StoreResult<LedgerState> {
        let mut state = LedgerState::new();
        for entry in self.accounts.iter() {
            let (key, value) = entry?;
            let raw = String::from_utf8_lossy(&key).into_owned();
            let id = AccountId::parse(&raw).map_err(|_| StoreError::CorruptKey(raw))?;
            let account: Account = decode(&value)?;
            state.insert(id, account);
        }
        if let Some(seq) = self.get_meta::<u64>(META_LAST_EVENT_SEQ)? {
            state.set_last_event_seq(seq);
        }
        Ok(state)
    }

    pub fn put_meta<T: Serialize>(&self, key: &[u8], value: &T) -> StoreResult<()> {
        self.metadata.insert(key, encode(value)?)?;
        Ok(())
    }

    pub fn get_meta<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<Option<T>> {
        self.metadata
            .get(key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::BadgeId;

    fn id(last: u8) -> AccountId {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        AccountId::from_bytes(bytes)
    }

    #[test]
    fn empty_store_loads_empty_state() {
        let store = LedgerStore::open_temporary().unwrap();
        assert_eq!(store.load_ledger().unwrap(), LedgerState::new());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let store = LedgerStore::open_temporary().unwrap();
        let mut state = LedgerState::new();
        state.insert(
            id(1),
            Account {
                deposited_balance: 5_000_000,
                reputation_score: 12,
                badge_token_id: Some(BadgeId::new(1)),
                yield_principal: 6_000_000,
            },
        );
        state.set_last_event_seq(17);

        store.save_ledger(&state).unwrap();
        assert_eq!(store.load_ledger().unwrap(), state);
    }

    #[test]
    fn save_drops_accounts_missing_from_snapshot() {
        let store = LedgerStore::open_temporary().unwrap();
        let mut state = LedgerState::new();
        state.insert(id(1), Account::default());
        state.insert(id(2), Account::default());
        store.save_ledger(&state).unwrap();

        state.remove(&id(2));
        store.save_ledger(&state).unwrap();
        let loaded = store.load_ledger().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(&id(2)).is_none());
    }

    #[test]
    fn metadata_roundtrip() {
        let store = LedgerStore::open_temporary().unwrap();
        assert_eq!(store.get_meta::<Vec<u64>>(b"pool").unwrap(), None);
        store.put_meta(b"pool", &vec![1u64, 2, 3]).unwrap();
        assert_eq!(store.get_meta::<Vec<u64>>(b"pool").unwrap(), Some(vec![1, 2, 3]));
    }
}
