//! The identity circuit.
//!
//! One circuit shape per proof type. Every shape proves three things about
//! the public signals:
//!
//! 1. `signals[0]` is the proof type's code,
//! 2. `signals[1] = Poseidon(NULLIFIER, secret_key, proof_type, context)`
//!    where `context = signals[3]`,
//! 3. `signals[2]` is the commitment to the private attributes used,
//!
//! and then runs the predicate sections that proof type enables. Composite
//! circuits carry every section, each gated by a public 0/1 flag.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonConfig;
use ark_r1cs_std::{
    alloc::AllocVar,
    boolean::Boolean,
    eq::EqGadget,
    fields::{fp::FpVar, FieldVar},
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use zeroize::Zeroize;

use super::gadgets::{
    enforce_boolean, enforce_gated_equal, enforce_gated_u64, enforce_u64, merkle_root,
    poseidon_tagged,
};
use crate::merkle::{domain, MerklePath, PoseidonHasher};
use crate::types::{Attribute, ProofType, Signal};

/// Private attribute plus the allow-list path of its Merkle leaf.
#[derive(Clone)]
pub struct MembershipWitness {
    pub attribute: Attribute,
    pub path: MerklePath,
}

impl MembershipWitness {
    pub fn zeroed(depth: usize) -> Self {
        Self {
            attribute: Attribute::empty(),
            path: MerklePath::zeroed(depth),
        }
    }
}

/// Every private input any circuit shape reads. Sections a proof type does
/// not use are left zeroed.
#[derive(Clone)]
pub struct PrivateInputs {
    pub secret_key: Fr,
    pub birth: Attribute,
    pub residency: MembershipWitness,
    pub nationality: MembershipWitness,
    pub credit_score: Attribute,
    pub document: Attribute,
}

impl PrivateInputs {
    pub fn zeroed(path_depth: usize) -> Self {
        Self {
            secret_key: Fr::from(0u64),
            birth: Attribute::empty(),
            residency: MembershipWitness::zeroed(path_depth),
            nationality: MembershipWitness::zeroed(path_depth),
            credit_score: Attribute::empty(),
            document: Attribute::empty(),
        }
    }
}

impl Drop for PrivateInputs {
    fn drop(&mut self) {
        self.secret_key.zeroize();
        self.birth.zeroize();
        self.residency.attribute.zeroize();
        self.nationality.attribute.zeroize();
        self.credit_score.zeroize();
        self.document.zeroize();
    }
}

#[derive(Clone)]
pub struct IdentityCircuit {
    pub poseidon_config: PoseidonConfig<Fr>,
    pub proof_type: ProofType,
    /// Public signals in [`ProofType::layout`] order.
    pub public_signals: Vec<Fr>,
    pub private: PrivateInputs,
    /// Allow-list Merkle depth; fixed per circuit shape.
    pub path_depth: usize,
}

impl IdentityCircuit {
    /// Shape-only instance used for key generation.
    pub fn blank(proof_type: ProofType, path_depth: usize) -> Self {
        Self {
            poseidon_config: PoseidonHasher::new().config().clone(),
            proof_type,
            public_signals: vec![Fr::from(0u64); proof_type.signal_count()],
            private: PrivateInputs::zeroed(path_depth),
            path_depth,
        }
    }

    fn signal(&self, signal: Signal) -> Option<Fr> {
        self.proof_type
            .layout()
            .iter()
            .position(|s| *s == signal)
            .and_then(|i| self.public_signals.get(i).copied())
    }
}

/// Allocated public inputs, looked up by slot.
struct PublicVars {
    slots: Vec<(Signal, FpVar<Fr>)>,
}

impl PublicVars {
    fn get(&self, signal: Signal) -> Result<FpVar<Fr>, SynthesisError> {
        self.slots
            .iter()
            .find(|(s, _)| *s == signal)
            .map(|(_, v)| v.clone())
            .ok_or(SynthesisError::AssignmentMissing)
    }

    /// The gate for a composite section, booleanity enforced; `None` when the
    /// section is unconditionally on.
    fn gate(&self, signal: Signal) -> Result<Option<FpVar<Fr>>, SynthesisError> {
        match self.slots.iter().find(|(s, _)| *s == signal) {
            Some((_, flag)) => {
                enforce_boolean(flag)?;
                Ok(Some(flag.clone()))
            }
            None => Ok(None),
        }
    }
}

struct Synth<'a> {
    cs: ConstraintSystemRef<Fr>,
    config: &'a PoseidonConfig<Fr>,
}

impl Synth<'_> {
    fn witness(&self, value: Fr) -> Result<FpVar<Fr>, SynthesisError> {
        FpVar::new_witness(self.cs.clone(), || Ok(value))
    }

    /// Allocate an attribute and return `(value, commitment)`.
    fn attribute(&self, attr: &Attribute) -> Result<(FpVar<Fr>, FpVar<Fr>), SynthesisError> {
        let value = self.witness(attr.value)?;
        let nonce = self.witness(attr.nonce)?;
        let commitment = poseidon_tagged(
            self.cs.clone(),
            self.config,
            domain::COMMIT,
            &[value.clone(), nonce],
        )?;
        Ok((value, commitment))
    }

    fn age(
        &self,
        birth: &Attribute,
        as_of: &FpVar<Fr>,
        min_age: &FpVar<Fr>,
        gate: Option<&FpVar<Fr>>,
    ) -> Result<FpVar<Fr>, SynthesisError> {
        let (birth, commitment) = self.attribute(birth)?;
        enforce_u64(self.cs.clone(), &birth)?;
        let slack = as_of.clone() - &birth - min_age;
        enforce_gated_u64(self.cs.clone(), &slack, gate)?;
        Ok(commitment)
    }

    fn membership(
        &self,
        member: &MembershipWitness,
        root: &FpVar<Fr>,
        gate: Option<&FpVar<Fr>>,
    ) -> Result<FpVar<Fr>, SynthesisError> {
        let (code, commitment) = self.attribute(&member.attribute)?;
        let leaf = poseidon_tagged(self.cs.clone(), self.config, domain::LEAF, &[code])?;

        let siblings = member
            .path
            .siblings
            .iter()
            .map(|s| self.witness(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let indices = member
            .path
            .indices
            .iter()
            .map(|b| Boolean::new_witness(self.cs.clone(), || Ok(*b)))
            .collect::<Result<Vec<_>, _>>()?;

        let computed = merkle_root(self.cs.clone(), self.config, leaf, &siblings, &indices)?;
        enforce_gated_equal(&computed, root, gate)?;
        Ok(commitment)
    }

    fn threshold(
        &self,
        score: &Attribute,
        min_score: &FpVar<Fr>,
        gate: Option<&FpVar<Fr>>,
    ) -> Result<FpVar<Fr>, SynthesisError> {
        let (score, commitment) = self.attribute(score)?;
        let slack = score - min_score;
        enforce_gated_u64(self.cs.clone(), &slack, gate)?;
        Ok(commitment)
    }
}

impl ConstraintSynthesizer<Fr> for IdentityCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let layout = self.proof_type.layout();
        if self.public_signals.len() != layout.len()
            || self.private.residency.path.depth() != self.path_depth
            || self.private.nationality.path.depth() != self.path_depth
        {
            return Err(SynthesisError::Unsatisfiable);
        }

        // Public inputs first, in layout order.
        let mut slots = Vec::with_capacity(layout.len());
        for signal in layout {
            let value = self.signal(signal).ok_or(SynthesisError::AssignmentMissing)?;
            slots.push((signal, FpVar::new_input(cs.clone(), || Ok(value))?));
        }
        let publics = PublicVars { slots };

        let tag = FpVar::constant(Fr::from(self.proof_type.code() as u64));
        publics.get(Signal::ProofType)?.enforce_equal(&tag)?;

        let synth = Synth {
            cs: cs.clone(),
            config: &self.poseidon_config,
        };

        // Nullifier
        let secret_key = synth.witness(self.private.secret_key)?;
        let nullifier = poseidon_tagged(
            cs.clone(),
            &self.poseidon_config,
            domain::NULLIFIER,
            &[secret_key, tag, publics.get(Signal::ChallengeContext)?],
        )?;
        nullifier.enforce_equal(&publics.get(Signal::NullifierHash)?)?;

        let private = &self.private;
        let commitment = match self.proof_type {
            ProofType::Age => synth.age(
                &private.birth,
                &publics.get(Signal::AsOf)?,
                &publics.get(Signal::MinAge)?,
                None,
            )?,
            ProofType::Residency => synth.membership(
                &private.residency,
                &publics.get(Signal::AllowListRoot)?,
                None,
            )?,
            ProofType::Nationality => synth.membership(
                &private.nationality,
                &publics.get(Signal::AllowListRoot)?,
                None,
            )?,
            ProofType::CreditScore => {
                synth.threshold(&private.credit_score, &publics.get(Signal::MinScore)?, None)?
            }
            ProofType::Composite => {
                let age_on = publics.gate(Signal::AgeEnabled)?;
                let residency_on = publics.gate(Signal::ResidencyEnabled)?;
                let nationality_on = publics.gate(Signal::NationalityEnabled)?;
                let credit_on = publics.gate(Signal::CreditEnabled)?;

                let c_birth = synth.age(
                    &private.birth,
                    &publics.get(Signal::AsOf)?,
                    &publics.get(Signal::MinAge)?,
                    age_on.as_ref(),
                )?;
                let c_residency = synth.membership(
                    &private.residency,
                    &publics.get(Signal::ResidencyRoot)?,
                    residency_on.as_ref(),
                )?;
                let c_nationality = synth.membership(
                    &private.nationality,
                    &publics.get(Signal::NationalityRoot)?,
                    nationality_on.as_ref(),
                )?;
                let c_score = synth.threshold(
                    &private.credit_score,
                    &publics.get(Signal::MinScore)?,
                    credit_on.as_ref(),
                )?;
                let (_, c_document) = synth.attribute(&private.document)?;

                poseidon_tagged(
                    cs.clone(),
                    &self.poseidon_config,
                    domain::AGGREGATE,
                    &[c_birth, c_residency, c_nationality, c_score, c_document],
                )?
            }
        };
        commitment.enforce_equal(&publics.get(Signal::Commitment)?)?;

        Ok(())
    }
}
