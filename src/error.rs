//! Engine-level error classification.

use ark_bn254::Fr;

use crate::credential::CredentialError;
use crate::field::{field_to_hex, FieldError};
use crate::keys::KeyError;
use crate::nullifier::RegistryError;
use crate::prover::ProverError;
use crate::verifier::VerifyError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse outcome classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad witness, challenge or encoding; fix the input and retry.
    Input,
    /// The holder does not qualify. Not a fault.
    PredicateUnsatisfied,
    Cryptographic,
    ReplayDetected,
    CredentialBinding,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Normal,
    /// Possible reuse or attack.
    High,
    /// Possible cloned authenticator.
    Critical,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("nullifier {} has already been used", field_to_hex(.nullifier))]
    ReplayDetected { nullifier: Fr },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Field(_) | EngineError::Config(_) => ErrorKind::Input,
            EngineError::Prover(e) => match e {
                ProverError::ChallengeExpired { .. }
                | ProverError::Compile(_)
                | ProverError::Witness(_) => ErrorKind::Input,
                ProverError::WitnessDoesNotSatisfyPredicate { .. } => ErrorKind::PredicateUnsatisfied,
                ProverError::ProofGenerationFailed(_) => ErrorKind::Cryptographic,
                ProverError::Keys(_) => ErrorKind::Storage,
            },
            EngineError::Verify(e) => match e {
                VerifyError::MalformedProof(_)
                | VerifyError::ChallengeExpired { .. }
                | VerifyError::InvalidChallenge(_) => ErrorKind::Input,
                VerifyError::PredicateNotSatisfied(_) => ErrorKind::PredicateUnsatisfied,
                VerifyError::VerificationFailed(_) => ErrorKind::Cryptographic,
                VerifyError::Keys(_) => ErrorKind::Storage,
            },
            EngineError::ReplayDetected { .. } => ErrorKind::ReplayDetected,
            EngineError::Credential(_) => ErrorKind::CredentialBinding,
            EngineError::Registry(_) | EngineError::Keys(_) => ErrorKind::Storage,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Credential(CredentialError::CounterRollback { .. }) => Severity::Critical,
            EngineError::ReplayDetected { .. } => Severity::High,
            _ => Severity::Normal,
        }
    }
}
