//! zkid-engine - prove identity attributes without revealing them
//!
//! Local-first zero-knowledge proofs over private identity attributes:
//! - Age: "I am at least 18 as of 2024-01-01"
//! - Residency / nationality: "my country is on this allow-list"
//! - Credit score: "my score is at least 650"
//! - Composite: any combination of the above in one proof
//!
//! # Architecture
//!
//! 1. The holder keeps an [`AttributeWitness`]; a verifier issues a [`Challenge`]
//! 2. The challenge compiles into a Groth16 circuit over BN254
//! 3. The prover emits a [`ProofEnvelope`] carrying a challenge-scoped nullifier
//! 4. The holder's device signs the envelope with its enrolled credential
//! 5. The verifier checks proof, signature and counter, then consumes the nullifier

pub mod circuit;
pub mod commitment;
pub mod config;
pub mod countries;
pub mod credential;
pub mod engine;
pub mod error;
pub mod field;
pub mod keys;
pub mod merkle;
pub mod nullifier;
pub mod prover;
pub mod telemetry;
pub mod types;
pub mod verifier;

pub use config::EngineConfig;
pub use credential::{Authenticator, CredentialRegistry, DeviceAuthenticator};
pub use engine::ProofEngine;
pub use error::{EngineError, EngineResult, ErrorKind, Severity};
pub use keys::KeyRing;
pub use nullifier::{MarkOutcome, NullifierRegistry};
pub use prover::Prover;
pub use types::{
    AttributeKind, AttributeWitness, Challenge, CompositeSelection, ProofEnvelope, ProofType,
};
pub use verifier::{VerificationOutcome, Verifier};
