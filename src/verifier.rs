//! Groth16 proof verification.
//!
//! Everything the challenge determines is recomputed here and compared to
//! the envelope's public signals before the pairing check runs. Only the
//! public signals are bound by the proof; the envelope's other fields are
//! checked against them and otherwise ignored.

use ark_bn254::Bn254;
use ark_groth16::Groth16;
use ark_snark::SNARK;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::circuit::{compile, CompileError};
use crate::keys::{KeyError, KeyRing};
use crate::prover::{proof_from_bytes, PROOF_BYTES};
use crate::types::{Challenge, ProofEnvelope};

pub type VerifierResult<T> = Result<T, VerifyError>;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("proof is for a different claim: {0}")]
    PredicateNotSatisfied(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("envelope timestamp {timestamp_ms} outside challenge window {issued_at_ms}..={expires_at_ms}")]
    ChallengeExpired {
        timestamp_ms: u64,
        issued_at_ms: u64,
        expires_at_ms: u64,
    },

    #[error(transparent)]
    InvalidChallenge(#[from] CompileError),

    #[error(transparent)]
    Keys(#[from] KeyError),
}

/// Boolean verdict with the failure reason, for callers that only branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl VerificationOutcome {
    pub fn from_result(result: &VerifierResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                is_valid: true,
                reason: None,
            },
            Err(e) => Self {
                is_valid: false,
                reason: Some(e.to_string()),
            },
        }
    }
}

#[derive(Clone)]
pub struct Verifier {
    keys: Arc<KeyRing>,
    clock_skew_ms: u64,
}

impl Verifier {
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

    /// Verify `envelope` answers `challenge`. Pure; touches no registry.
    pub fn verify(&self, envelope: &ProofEnvelope, challenge: &Challenge) -> VerifierResult<()> {
        let proof_type = envelope.proof_type;
        if proof_type != challenge.proof_type {
            return Err(VerifyError::PredicateNotSatisfied(format!(
                "{proof_type} proof presented for a {} challenge",
                challenge.proof_type
            )));
        }

        let signals = &envelope.public_signals;
        if signals.len() != proof_type.signal_count() {
            return Err(VerifyError::MalformedProof(format!(
                "expected {} public signals, got {}",
                proof_type.signal_count(),
                signals.len()
            )));
        }
        if !envelope.is_consistent() {
            return Err(VerifyError::MalformedProof(
                "nullifier_hash or commitment disagrees with public signals".into(),
            ));
        }

        let compiled = compile(proof_type, challenge)?;
        let expected = compiled.public_signals(envelope.nullifier_hash, envelope.commitment);
        for ((signal, got), want) in proof_type.layout().iter().zip(signals).zip(&expected) {
            if got != want {
                return Err(VerifyError::PredicateNotSatisfied(format!(
                    "public signal {signal:?} does not match the challenge"
                )));
            }
        }

        if !challenge.is_open_at(envelope.timestamp, self.clock_skew_ms) {
            return Err(VerifyError::ChallengeExpired {
                timestamp_ms: envelope.timestamp,
                issued_at_ms: challenge.issued_at_ms,
                expires_at_ms: challenge.expires_at_ms,
            });
        }

        let proof = proof_from_bytes(&envelope.proof).ok_or_else(|| {
            VerifyError::MalformedProof(format!(
                "expected {PROOF_BYTES} bytes of compressed curve points, got {} bytes",
                envelope.proof.len()
            ))
        })?;

        let keys = self.keys.get(proof_type)?;
        let valid = Groth16::<Bn254>::verify_with_processed_vk(keys.prepared(), signals, &proof)
            .map_err(|e| VerifyError::VerificationFailed(e.to_string()))?;
        if !valid {
            debug!(%proof_type, "pairing check failed");
            return Err(VerifyError::VerificationFailed(
                "pairing check rejected the proof".into(),
            ));
        }

        info!(%proof_type, "proof verified");
        Ok(())
    }

    pub fn verify_proof(&self, envelope: &ProofEnvelope, challenge: &Challenge) -> VerificationOutcome {
        VerificationOutcome::from_result(&self.verify(envelope, challenge))
    }
}
