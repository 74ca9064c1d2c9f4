//! # Accounts
//!
//! An account is keyed by a wallet address: `0x` followed by 40 hex digits.
//! Keys are normalized to lowercase on parse so `0xAbC…` and `0xabc…` name
//! the same account.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::badge::BadgeId;

/// Length of an address payload in bytes.
pub const ADDRESS_BYTES: usize = 20;

/// Reasons an account key fails to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("account key must start with 0x")]
    MissingPrefix,

    #[error("account key must have {expected} hex digits, got {got}")]
    BadLength { expected: usize, got: usize },

    #[error("account key contains non-hex characters")]
    NotHex,
}

/// A syntactically valid, normalized account key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parses and normalizes an address string.
    pub fn parse(raw: &str) -> Result<Self, AccountIdError> {
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or(AccountIdError::MissingPrefix)?;
        if digits.len() != ADDRESS_BYTES * 2 {
            return Err(AccountIdError::BadLength {
                expected: ADDRESS_BYTES * 2,
                got: digits.len(),
            });
        }
        hex::decode(digits).map_err(|_| AccountIdError::NotHex)?;
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Builds an account key from raw address bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

/// Per-account ledger record.
///
/// Unseen accounts read as `Account::default()`: zero balance, zero
/// reputation, no badge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Funds the account can withdraw or spend, in USDC units.
    pub deposited_balance: u64,
    /// Reputation. Only the admin override ever lowers it.
    pub reputation_score: u64,
    /// The account's badge, once minted.
    pub badge_token_id: Option<BadgeId>,
    /// Funds currently placed in the yield venue on the account's behalf.
    ///
    /// Invariant: `yield_principal >= deposited_balance`.
    pub yield_principal: u64,
}

impl Account {
    pub fn is_empty(&self) -> bool {
        self.deposited_balance == 0 && self.yield_principal == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    #[test]
    fn parses_and_normalizes_case() {
        let upper = AccountId::parse("0x00000000000000000000000000000000000A11CE").unwrap();
        let lower = AccountId::parse(ALICE).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), ALICE);
    }

    #[test]
    fn rejects_missing_prefix() {
        let raw = &ALICE[2..];
        assert_eq!(AccountId::parse(raw), Err(AccountIdError::MissingPrefix));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            AccountId::parse("0x1234"),
            Err(AccountIdError::BadLength {
                expected: 40,
                got: 4
            })
        );
    }

    #[test]
    fn rejects_non_hex() {
        let raw = "0xzz000000000000000000000000000000000a11ce";
        assert_eq!(AccountId::parse(raw), Err(AccountIdError::NotHex));
    }

    #[test]
    fn serde_goes_through_validation() {
        let ok: AccountId = serde_json::from_str(&format!("\"{ALICE}\"")).unwrap();
        assert_eq!(ok.to_string(), ALICE);
        assert!(serde_json::from_str::<AccountId>("\"0xnope\"").is_err());
    }

    #[test]
    fn from_bytes_matches_parse() {
        let mut bytes = [0u8; ADDRESS_BYTES];
        bytes[18] = 0x0a;
        bytes[19] = 0x11;
        let id = AccountId::from_bytes(bytes);
        assert_eq!(id, AccountId::parse("0x0000000000000000000000000000000000000a11").unwrap());
    }
}
