//! # Zero-Knowledge Proof Verification
//!
//! The ledger can gate privacy-sensitive features on a zero-knowledge
//! assertion, e.g. "my reputation is at least 50" without revealing the
//! score. Verification is pluggable behind [`ProofVerifier`]:
//!
//! ```text
//! mod.rs      : proof encoding (FieldWord, Groth16Proof), the trait, the dev stub
//! verifier.rs : Groth16 over BN254 (Groth16Verifier)
//! ```
//!
//! Proofs use the Solidity verifier layout: `a` and `c` are G1 points as
//! `[x, y]`, `b` is a G2 point as `[[x.c1, x.c0], [y.c1, y.c0]]`, and every
//! coordinate and public input is a 256-bit big-endian word. Proofs produced
//! for an on-chain verifier can be checked here unchanged.

pub mod verifier;

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub use verifier::Groth16Verifier;

/// Size of a field word in bytes.
pub const WORD_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while decoding or verifying a proof.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    /// A word does not parse as a 256-bit integer.
    #[error("invalid field word: {0}")]
    InvalidWord(String),

    /// A coordinate or input is not reduced modulo its field.
    #[error("non-canonical field element in {0}")]
    NonCanonical(&'static str),

    /// A point is not on the curve or not in the prime-order subgroup.
    #[error("malformed curve point: {0}")]
    MalformedPoint(&'static str),

    /// The verifying key expects a different number of public inputs.
    #[error("expected {expected} public inputs, got {got}")]
    InputCount { expected: usize, got: usize },

    /// The verifying key could not be decoded.
    #[error("invalid verifying key: {0}")]
    InvalidKey(String),

    /// The verification algorithm itself failed.
    #[error("verification failed: {0}")]
    Verification(String),
}

// ---------------------------------------------------------------------------
// FieldWord
// ---------------------------------------------------------------------------

/// A 256-bit big-endian word, the unit of the Solidity proof encoding.
///
/// Serialized as a `0x`-prefixed hex string. Deserializes from a hex
/// string, a decimal string, or a JSON integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldWord([u8; WORD_BYTES]);

impl FieldWord {
    pub const fn from_be_bytes(bytes: [u8; WORD_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; WORD_BYTES];
        bytes[WORD_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_be_bytes(&self) -> &[u8; WORD_BYTES] {
        &self.0
    }

    /// Parses `0x`-prefixed hex (up to 64 digits) or an unsigned decimal.
    pub fn parse(raw: &str) -> Result<Self, ProofError> {
        let raw = raw.trim();
        if let Some(digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            if digits.is_empty() || digits.len() > WORD_BYTES * 2 {
                return Err(ProofError::InvalidWord(raw.to_string()));
            }
            let padded = format!("{:0>64}", digits);
            let decoded =
                hex::decode(padded).map_err(|_| ProofError::InvalidWord(raw.to_string()))?;
            let mut bytes = [0u8; WORD_BYTES];
            bytes.copy_from_slice(&decoded);
            return Ok(Self(bytes));
        }
        Self::parse_decimal(raw)
    }

    fn parse_decimal(raw: &str) -> Result<Self, ProofError> {
        if raw.is_empty() {
            return Err(ProofError::InvalidWord(raw.to_string()));
        }
        let mut bytes = [0u8; WORD_BYTES];
        for ch in raw.chars() {
            let digit = ch
                .to_digit(10)
                .ok_or_else(|| ProofError::InvalidWord(raw.to_string()))?;
            // bytes = bytes * 10 + digit, big-endian, carrying from the right.
            let mut carry = digit;
            for byte in bytes.iter_mut().rev() {
                let v = (*byte as u32) * 10 + carry;
                *byte = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(ProofError::InvalidWord(raw.to_string()));
            }
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for FieldWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldWord({self})")
    }
}

impl fmt::Display for FieldWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for FieldWord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldWord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(FieldWord::from_u64(n)),
            Repr::Text(s) => FieldWord::parse(&s).map_err(de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// Groth16Proof
// ---------------------------------------------------------------------------

/// A Groth16 proof in the Solidity verifier layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub a: [FieldWord; 2],
    pub b: [[FieldWord; 2]; 2],
    pub c: [FieldWord; 2],
}

// ---------------------------------------------------------------------------
// ProofVerifier
// ---------------------------------------------------------------------------

/// A pluggable zero-knowledge assertion checker.
pub trait ProofVerifier: Send + Sync {
    /// `Ok(true)` if the proof verifies against `public_inputs`, `Ok(false)`
    /// if it is well-formed but wrong, `Err` if it cannot be checked at all.
    fn verify(&self, proof: &Groth16Proof, public_inputs: &[FieldWord])
        -> Result<bool, ProofError>;
}

/// Accepts every proof.
///
/// Development stub mirroring the demo verifier. Never wire this into a
/// deployment that gates anything of value on a proof.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl ProofVerifier for AcceptAllVerifier {
    fn verify(&self, _proof: &Groth16Proof, _public_inputs: &[FieldWord]) -> Result<bool, ProofError> {
        Ok(true)
    }
}
