//! Hiding commitments to attribute values.
//!
//! `commit(v, r) = Poseidon(COMMIT, v, r)`. Opening recomputes the hash and
//! compares the encodings in constant time.

use ark_bn254::Fr;
use ark_std::rand::{CryptoRng, RngCore};
use ark_std::UniformRand;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::field::{field_from_bytes, field_to_bytes};
use crate::merkle::{domain, PoseidonHasher};

/// Public commitment to a single private value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "crate::field::serde_hex")] pub Fr);

impl Commitment {
    pub fn to_bytes(&self) -> [u8; 32] {
        field_to_bytes(&self.0)
    }
}

/// Draw a fresh blinding nonce.
pub fn random_nonce<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    Fr::rand(rng)
}

pub fn commit(value: &Fr, nonce: &Fr) -> Commitment {
    Commitment(PoseidonHasher::new().hash_tagged(domain::COMMIT, &[*value, *nonce]))
}

/// Check that `commitment` opens to `(value, nonce)`.
pub fn open(commitment: &Commitment, value: &Fr, nonce: &Fr) -> bool {
    let recomputed = commit(value, nonce).to_bytes();
    recomputed.ct_eq(&commitment.to_bytes()).into()
}

/// Open from raw encodings; any malformed input yields `false`.
pub fn open_encoded(commitment: &[u8], value: &[u8], nonce: &[u8]) -> bool {
    let parsed = (
        field_from_bytes(commitment),
        field_from_bytes(value),
        field_from_bytes(nonce),
    );
    match parsed {
        (Ok(c), Ok(v), Ok(n)) => open(&Commitment(c), &v, &n),
        _ => false,
    }
}

/// Combine per-attribute commitments into the single commitment a
/// composite proof exposes.
pub fn aggregate(commitments: &[Commitment]) -> Commitment {
    let parts: Vec<Fr> = commitments.iter().map(|c| c.0).collect();
    Commitment(PoseidonHasher::new().hash_tagged(domain::AGGREGATE, &parts))
}
