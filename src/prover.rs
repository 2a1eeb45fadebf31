//! Groth16 proof generation.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, Proof};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::circuit::{compile, AssignError, CompileError, IdentityCircuit, Predicate};
use crate::keys::{KeyError, KeyRing};
use crate::nullifier::now_ms;
use crate::types::{AttributeWitness, Challenge, ProofEnvelope, ProofType, WitnessError};

/// Compressed Groth16 proof size on BN254: two G1 points and one G2 point.
pub const PROOF_BYTES: usize = 128;

pub type ProverResult<T> = Result<T, ProverError>;

#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("challenge is not valid at {now_ms} (window {issued_at_ms}..={expires_at_ms})")]
    ChallengeExpired {
        now_ms: u64,
        issued_at_ms: u64,
        expires_at_ms: u64,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Witness(#[from] WitnessError),

    #[error("witness does not satisfy the {predicate} predicate")]
    WitnessDoesNotSatisfyPredicate { predicate: Predicate },

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error(transparent)]
    Keys(#[from] KeyError),
}

impl From<AssignError> for ProverError {
    fn from(e: AssignError) -> Self {
        match e {
            AssignError::Witness(w) => ProverError::Witness(w),
            AssignError::Unsatisfied(predicate) => {
                ProverError::WitnessDoesNotSatisfyPredicate { predicate }
            }
        }
    }
}

pub fn proof_to_bytes(proof: &Proof<Bn254>) -> ProverResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(PROOF_BYTES);
    proof
        .serialize_compressed(&mut bytes)
        .map_err(|e| ProverError::ProofGenerationFailed(e.to_string()))?;
    Ok(bytes)
}

/// Parse a compressed proof; `None` unless it is exactly [`PROOF_BYTES`]
/// of valid curve points.
pub fn proof_from_bytes(bytes: &[u8]) -> Option<Proof<Bn254>> {
    if bytes.len() != PROOF_BYTES {
        return None;
    }
    Proof::<Bn254>::deserialize_compressed(bytes).ok()
}

/// Generates proofs against an installed key ring. Holds no other state.
#[derive(Clone)]
pub struct Prover {
    keys: Arc<KeyRing>,
    clock_skew_ms: u64,
}

impl Prover {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self {
            keys,
            clock_skew_ms: 0,
        }
    }

    pub fn with_clock_skew(mut self, clock_skew_ms: u64) -> Self {
        self.clock_skew_ms = clock_skew_ms;
        self
    }

    pub fn generate(
        &self,
        proof_type: ProofType,
        witness: &AttributeWitness,
        challenge: &Challenge,
    ) -> ProverResult<ProofEnvelope> {
        self.generate_at(proof_type, witness, challenge, now_ms())
    }

    /// Generate an unsigned envelope as of `now_ms`.
    pub fn generate_at(
        &self,
        proof_type: ProofType,
        witness: &AttributeWitness,
        challenge: &Challenge,
        now_ms: u64,
    ) -> ProverResult<ProofEnvelope> {
        if !challenge.is_open_at(now_ms, self.clock_skew_ms) {
            return Err(ProverError::ChallengeExpired {
                now_ms,
                issued_at_ms: challenge.issued_at_ms,
                expires_at_ms: challenge.expires_at_ms,
            });
        }

        let compiled = compile(proof_type, challenge)?;
        let assignment = compiled.assign(witness).map_err(|e| {
            if let AssignError::Unsatisfied(predicate) = &e {
                debug!(%proof_type, %predicate, "witness does not qualify");
            }
            ProverError::from(e)
        })?;
        let proving_key = self.keys.proving_key(proof_type)?;

        let started = Instant::now();
        let num_constraints = check_satisfied(&assignment.circuit)?;

        let proof = Groth16::<Bn254>::prove(proving_key, assignment.circuit.clone(), &mut OsRng)
            .map_err(|e| ProverError::ProofGenerationFailed(e.to_string()))?;

        let envelope = ProofEnvelope {
            proof: proof_to_bytes(&proof)?,
            public_signals: assignment.circuit.public_signals.clone(),
            nullifier_hash: assignment.nullifier,
            commitment: assignment.commitment,
            signature: Vec::new(),
            timestamp: now_ms,
            proof_type,
        };

        info!(
            %proof_type,
            num_constraints,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "proof generated"
        );
        Ok(envelope)
    }
}

/// Synthesize the circuit once in a scratch constraint system and confirm
/// every constraint holds. Returns the constraint count.
fn check_satisfied(circuit: &IdentityCircuit) -> ProverResult<usize> {
    let cs = ConstraintSystem::<Fr>::new_ref();
    circuit
        .clone()
        .generate_constraints(cs.clone())
        .map_err(|e| ProverError::ProofGenerationFailed(e.to_string()))?;

    let satisfied = cs
        .is_satisfied()
        .map_err(|e| ProverError::ProofGenerationFailed(e.to_string()))?;
    if !satisfied {
        let failing = cs.which_is_unsatisfied().ok().flatten();
        warn!(?failing, "assigned circuit is not satisfied");
        return Err(ProverError::ProofGenerationFailed(
            "assigned circuit is not satisfied".into(),
        ));
    }
    Ok(cs.num_constraints())
}
