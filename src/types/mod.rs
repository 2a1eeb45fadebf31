//! Public data model: proof types, challenges, witnesses and envelopes.

pub mod challenge;
pub mod envelope;
pub mod proof_type;
pub mod witness;

pub use challenge::{shift_timestamp, Challenge, CompositeSelection, EPOCH_SHIFT_SECS};
pub use envelope::{ContractTuple, ProofEnvelope};
pub use proof_type::{ProofType, ProofTypeInfo, Signal, PROOF_TYPES};
pub use witness::{Attribute, AttributeKind, AttributeWitness, WitnessError, MAX_CREDIT_SCORE};
