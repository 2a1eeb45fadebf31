//! Constraint gadgets shared by every predicate section.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    constraints::CryptographicSpongeVar,
    poseidon::{constraints::PoseidonSpongeVar, PoseidonConfig},
};
use ark_ff::{BigInteger, Field, One, PrimeField};
use ark_r1cs_std::{
    alloc::AllocVar,
    boolean::Boolean,
    eq::EqGadget,
    fields::{fp::FpVar, FieldVar},
    select::CondSelectGadget,
    R1CSVar,
};
use ark_relations::r1cs::{ConstraintSystemRef, SynthesisError};

/// Width of every range check. Differences that wrapped around the field
/// modulus never fit in this many bits.
pub const RANGE_BITS: usize = 64;

/// `Poseidon(tag, inputs...)` in-circuit; matches
/// [`crate::merkle::PoseidonHasher::hash_tagged`].
pub fn poseidon_tagged(
    cs: ConstraintSystemRef<Fr>,
    config: &PoseidonConfig<Fr>,
    tag: u64,
    inputs: &[FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, config);
    sponge.absorb(&FpVar::constant(Fr::from(tag)))?;
    for input in inputs {
        sponge.absorb(input)?;
    }
    let mut output = sponge.squeeze_field_elements(1)?;
    Ok(output.remove(0))
}

/// `Poseidon(left, right)` in-circuit; matches `PoseidonHasher::hash_two`.
pub fn poseidon_hash_two(
    cs: ConstraintSystemRef<Fr>,
    config: &PoseidonConfig<Fr>,
    left: &FpVar<Fr>,
    right: &FpVar<Fr>,
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, config);
    sponge.absorb(left)?;
    sponge.absorb(right)?;
    let mut output = sponge.squeeze_field_elements(1)?;
    Ok(output.remove(0))
}

/// Enforce `0 <= value < 2^RANGE_BITS` by bit decomposition.
pub fn enforce_u64(cs: ConstraintSystemRef<Fr>, value: &FpVar<Fr>) -> Result<(), SynthesisError> {
    // No value is available while generating keys; the bits are never read then.
    let native = value.value().unwrap_or_default();
    let bits = native.into_bigint().to_bits_le();

    let mut sum = FpVar::<Fr>::zero();
    let mut coeff = Fr::one();
    for i in 0..RANGE_BITS {
        let bit = Boolean::new_witness(cs.clone(), || Ok(bits.get(i).copied().unwrap_or(false)))?;
        sum += FpVar::from(bit) * coeff;
        coeff.double_in_place();
    }
    sum.enforce_equal(value)
}

/// Enforce `flag ∈ {0, 1}` for a public flag allocated as a field element.
pub fn enforce_boolean(flag: &FpVar<Fr>) -> Result<(), SynthesisError> {
    let flag_minus_one = flag.clone() - Fr::one();
    flag.mul_equals(&flag_minus_one, &FpVar::zero())
}

/// `a == b` when no gate is given, `gate * (a - b) == 0` otherwise.
pub fn enforce_gated_equal(
    a: &FpVar<Fr>,
    b: &FpVar<Fr>,
    gate: Option<&FpVar<Fr>>,
) -> Result<(), SynthesisError> {
    match gate {
        None => a.enforce_equal(b),
        Some(gate) => {
            let diff = a.clone() - b;
            diff.mul_equals(gate, &FpVar::zero())
        }
    }
}

/// Range check `value`, or `gate * value` when gated.
pub fn enforce_gated_u64(
    cs: ConstraintSystemRef<Fr>,
    value: &FpVar<Fr>,
    gate: Option<&FpVar<Fr>>,
) -> Result<(), SynthesisError> {
    match gate {
        None => enforce_u64(cs, value),
        Some(gate) => enforce_u64(cs, &(value.clone() * gate)),
    }
}

/// Fold a leaf up a Merkle path and return the computed root.
pub fn merkle_root(
    cs: ConstraintSystemRef<Fr>,
    config: &PoseidonConfig<Fr>,
    leaf: FpVar<Fr>,
    siblings: &[FpVar<Fr>],
    indices: &[Boolean<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut current = leaf;
    for (sibling, is_right) in siblings.iter().zip(indices.iter()) {
        // is_right: current is the right child, hash(sibling, current)
        let left = FpVar::conditionally_select(is_right, sibling, &current)?;
        let right = FpVar::conditionally_select(is_right, &current, sibling)?;
        current = poseidon_hash_two(cs.clone(), config, &left, &right)?;
    }
    Ok(current)
}
