//! # Groth16 Proof Verification
//!
//! A [`ProofVerifier`] over BN254 backed by arkworks. The verifying key is
//! small and loaded once at startup, typically from the same file an
//! on-chain verifier contract was generated from.
//!
//! Verification is three pairings plus a multi-scalar multiplication over
//! the public inputs, so it costs the same regardless of circuit size.

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ff::{BigInteger, PrimeField};
use ark_groth16::{Groth16, Proof, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;

use super::{FieldWord, Groth16Proof, ProofError, ProofVerifier, WORD_BYTES};

// ---------------------------------------------------------------------------
// Groth16Verifier
// ---------------------------------------------------------------------------

/// Holds the Groth16 verification key for one circuit.
#[derive(Clone)]
pub struct Groth16Verifier {
    vk: VerifyingKey<Bn254>,
}

impl Groth16Verifier {
    pub fn new(vk: VerifyingKey<Bn254>) -> Self {
        Self { vk }
    }

    /// Decodes a compressed arkworks verifying key.
    pub fn from_vk_bytes(data: &[u8]) -> Result<Self, ProofError> {
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(data)
            .map_err(|e| ProofError::InvalidKey(e.to_string()))?;
        Ok(Self { vk })
    }

    /// Encodes the verifying key in compressed arkworks form.
    pub fn vk_to_bytes(&self) -> Result<Vec<u8>, ProofError> {
        let mut buf = Vec::new();
        self.vk
            .serialize_compressed(&mut buf)
            .map_err(|e| ProofError::InvalidKey(e.to_string()))?;
        Ok(buf)
    }

    /// Number of public inputs the circuit expects.
    pub fn public_input_count(&self) -> usize {
        self.vk.gamma_abc_g1.len().saturating_sub(1)
    }
}

impl ProofVerifier for Groth16Verifier {
    fn verify(
        &self,
        proof: &Groth16Proof,
        public_inputs: &[FieldWord],
    ) -> Result<bool, ProofError> {
        let expected = self.public_input_count();
        if public_inputs.len() != expected {
            return Err(ProofError::InputCount {
                expected,
                got: public_inputs.len(),
            });
        }

        let ark_proof = decode_proof(proof)?;
        let inputs = public_inputs
            .iter()
            .map(|w| scalar(w, "public input"))
            .collect::<Result<Vec<Fr>, _>>()?;

        Groth16::<Bn254>::verify(&self.vk, &inputs, &ark_proof)
            .map_err(|e| ProofError::Verification(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Converts an arkworks proof to the Solidity word layout.
pub fn encode_proof(proof: &Proof<Bn254>) -> Groth16Proof {
    Groth16Proof {
        a: [word(&proof.a.x), word(&proof.a.y)],
        b: [
            [word(&proof.b.x.c1), word(&proof.b.x.c0)],
            [word(&proof.b.y.c1), word(&proof.b.y.c0)],
        ],
        c: [word(&proof.c.x), word(&proof.c.y)],
    }
}

/// Encodes a scalar as a public-input word.
pub fn encode_scalar(value: &Fr) -> FieldWord {
    word(value)
}

fn word<F: PrimeField>(element: &F) -> FieldWord {
    let be = element.into_bigint().to_bytes_be();
    let mut bytes = [0u8; WORD_BYTES];
    bytes[WORD_BYTES - be.len()..].copy_from_slice(&be);
    FieldWord::from_be_bytes(bytes)
}

fn decode_proof(proof: &Groth16Proof) -> Result<Proof<Bn254>, ProofError> {
    let a = g1(&proof.a, "a")?;
    let b = g2(&proof.b, "b")?;
    let c = g1(&proof.c, "c")?;
    Ok(Proof { a, b, c })
}

/// Decodes a field element, rejecting values at or above the modulus.
fn canonical<F: PrimeField>(w: &FieldWord, what: &'static str) -> Result<F, ProofError> {
    let element = F::from_be_bytes_mod_order(w.as_be_bytes());
    if word(&element) != *w {
        return Err(ProofError::NonCanonical(what));
    }
    Ok(element)
}

fn scalar(w: &FieldWord, what: &'static str) -> Result<Fr, ProofError> {
    canonical::<Fr>(w, what)
}

fn g1(coords: &[FieldWord; 2], what: &'static str) -> Result<G1Affine, ProofError> {
    let x: Fq = canonical(&coords[0], what)?;
    let y: Fq = canonical(&coords[1], what)?;
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::MalformedPoint(what));
    }
    Ok(point)
}

fn g2(coords: &[[FieldWord; 2]; 2], what: &'static str) -> Result<G2Affine, ProofError> {
    let x = Fq2::new(canonical(&coords[0][1], what)?, canonical(&coords[0][0], what)?);
    let y = Fq2::new(canonical(&coords[1][1], what)?, canonical(&coords[1][0], what)?);
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::MalformedPoint(what));
    }
    Ok(point)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
