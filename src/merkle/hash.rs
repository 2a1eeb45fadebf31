//! Poseidon hash over the BN254 scalar field.
//!
//! The same parameters drive the native sponge here and the constraint
//! gadgets in [`crate::circuit::gadgets`], so a value hashed outside the
//! circuit always matches the in-circuit computation.

use std::sync::{Arc, OnceLock};

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    poseidon::{PoseidonConfig, PoseidonSponge},
    CryptographicSponge,
};
use ark_ff::Field;
use ark_std::vec::Vec;

/// Domain tags absorbed ahead of the payload so hashes used for different
/// purposes never coincide.
pub mod domain {
    pub const COMMIT: u64 = 0x636f_6d6d;
    pub const LEAF: u64 = 0x6c65_6166;
    pub const NULLIFIER: u64 = 0x6e75_6c6c;
    pub const CHALLENGE: u64 = 0x6368_616c;
    pub const AGGREGATE: u64 = 0x6167_6772;
    pub const REDEMPTION: u64 = 0x7265_6465;
}

const FULL_ROUNDS: usize = 8;
const PARTIAL_ROUNDS: usize = 57;
const ALPHA: u64 = 5;
const RATE: usize = 2;
const CAPACITY: usize = 1;

static CONFIG: OnceLock<Arc<PoseidonConfig<Fr>>> = OnceLock::new();

/// Poseidon hasher configured for the BN254 scalar field.
///
/// Cheap to clone; the round constants are generated once per process.
#[derive(Clone)]
pub struct PoseidonHasher {
    config: Arc<PoseidonConfig<Fr>>,
}

impl PoseidonHasher {
    pub fn new() -> Self {
        let config = CONFIG
            .get_or_init(|| Arc::new(Self::default_config()))
            .clone();
        Self { config }
    }

    fn default_config() -> PoseidonConfig<Fr> {
        let (ark, mds) = Self::generate_parameters(RATE + CAPACITY, FULL_ROUNDS + PARTIAL_ROUNDS);

        PoseidonConfig {
            full_rounds: FULL_ROUNDS,
            partial_rounds: PARTIAL_ROUNDS,
            alpha: ALPHA,
            ark,
            mds,
            rate: RATE,
            capacity: CAPACITY,
        }
    }

    /// Round constants from a fixed multiplicative sequence and a Cauchy MDS
    /// matrix `1 / (x_i + y_j)`.
    fn generate_parameters(width: usize, total_rounds: usize) -> (Vec<Vec<Fr>>, Vec<Vec<Fr>>) {
        let ark = (0..total_rounds)
            .map(|r| {
                (0..width)
                    .map(|i| {
                        let seed = ((r * width + i) as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                        Fr::from(seed)
                    })
                    .collect()
            })
            .collect();

        let mds = (0..width)
            .map(|i| {
                (0..width)
                    .map(|j| {
                        let x = Fr::from((i + 1) as u64);
                        let y = Fr::from((width + j + 1) as u64);
                        (x + y).inverse().unwrap_or(Fr::from(1u64))
                    })
                    .collect()
            })
            .collect();

        (ark, mds)
    }

    /// Hash two field elements into one. Used for Merkle internal nodes.
    pub fn hash_two(&self, left: &Fr, right: &Fr) -> Fr {
        let mut sponge = PoseidonSponge::new(self.config());
        sponge.absorb(left);
        sponge.absorb(right);
        sponge.squeeze_field_elements(1)[0]
    }

    /// Hash multiple field elements into one.
    pub fn hash_many(&self, elements: &[Fr]) -> Fr {
        let mut sponge = PoseidonSponge::new(self.config());
        for elem in elements {
            sponge.absorb(elem);
        }
        sponge.squeeze_field_elements(1)[0]
    }

    /// Hash `elements` prefixed with a domain tag from [`domain`].
    pub fn hash_tagged(&self, tag: u64, elements: &[Fr]) -> Fr {
        let mut sponge = PoseidonSponge::new(self.config());
        sponge.absorb(&Fr::from(tag));
        for elem in elements {
            sponge.absorb(elem);
        }
        sponge.squeeze_field_elements(1)[0]
    }

    pub fn config(&self) -> &PoseidonConfig<Fr> {
        &self.config
    }
}

impl Default for PoseidonHasher {
    fn default() -> Self {
        Self::new()
    }
}
