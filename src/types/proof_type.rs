//! The proof-type table.
//!
//! Codes are a stable wire contract (1=age .. 5=composite). Everything that
//! needs a display name or the public-signal layout of a proof type reads
//! it from [`PROOF_TYPES`].

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ProofType {
    Age = 1,
    Residency = 2,
    Nationality = 3,
    CreditScore = 4,
    Composite = 5,
}

/// One public signal slot, in the order the verifier reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    ProofType,
    NullifierHash,
    Commitment,
    ChallengeContext,
    AsOf,
    MinAge,
    AllowListRoot,
    MinScore,
    AgeEnabled,
    ResidencyEnabled,
    ResidencyRoot,
    NationalityEnabled,
    NationalityRoot,
    CreditEnabled,
}

/// Signals every proof type starts with.
pub const COMMON_SIGNALS: [Signal; 4] = [
    Signal::ProofType,
    Signal::NullifierHash,
    Signal::Commitment,
    Signal::ChallengeContext,
];

pub const NULLIFIER_SIGNAL_INDEX: usize = 1;
pub const COMMITMENT_SIGNAL_INDEX: usize = 2;
pub const CONTEXT_SIGNAL_INDEX: usize = 3;

#[derive(Debug)]
pub struct ProofTypeInfo {
    pub proof_type: ProofType,
    pub name: &'static str,
    pub label: &'static str,
    /// Signals following [`COMMON_SIGNALS`].
    pub constants: &'static [Signal],
}

pub const PROOF_TYPES: [ProofTypeInfo; 5] = [
    ProofTypeInfo {
        proof_type: ProofType::Age,
        name: "age",
        label: "Age Verification",
        constants: &[Signal::AsOf, Signal::MinAge],
    },
    ProofTypeInfo {
        proof_type: ProofType::Residency,
        name: "residency",
        label: "Residency Proof",
        constants: &[Signal::AllowListRoot],
    },
    ProofTypeInfo {
        proof_type: ProofType::Nationality,
        name: "nationality",
        label: "Nationality Proof",
        constants: &[Signal::AllowListRoot],
    },
    ProofTypeInfo {
        proof_type: ProofType::CreditScore,
        name: "credit-score",
        label: "Credit Score Proof",
        constants: &[Signal::MinScore],
    },
    ProofTypeInfo {
        proof_type: ProofType::Composite,
        name: "composite",
        label: "Composite Proof",
        constants: &[
            Signal::AgeEnabled,
            Signal::AsOf,
            Signal::MinAge,
            Signal::ResidencyEnabled,
            Signal::ResidencyRoot,
            Signal::NationalityEnabled,
            Signal::NationalityRoot,
            Signal::CreditEnabled,
            Signal::MinScore,
        ],
    },
];

impl ProofType {
    pub const ALL: [ProofType; 5] = [
        ProofType::Age,
        ProofType::Residency,
        ProofType::Nationality,
        ProofType::CreditScore,
        ProofType::Composite,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn info(self) -> &'static ProofTypeInfo {
        &PROOF_TYPES[self.code() as usize - 1]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Total number of public signals a proof of this type exposes.
    pub fn signal_count(self) -> usize {
        COMMON_SIGNALS.len() + self.info().constants.len()
    }

    /// Full ordered signal layout.
    pub fn layout(self) -> Vec<Signal> {
        COMMON_SIGNALS
            .iter()
            .chain(self.info().constants.iter())
            .copied()
            .collect()
    }
}

impl From<ProofType> for u8 {
    fn from(t: ProofType) -> u8 {
        t.code()
    }
}

impl TryFrom<u8> for ProofType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown proof type code {code}"))
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_code() {
        for t in ProofType::ALL {
            assert_eq!(t.info().proof_type, t);
            assert_eq!(ProofType::from_code(t.code()), Some(t));
        }
        assert_eq!(ProofType::from_code(0), None);
        assert_eq!(ProofType::from_code(6), None);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ProofType::Age.code(), 1);
        assert_eq!(ProofType::Residency.code(), 2);
        assert_eq!(ProofType::Nationality.code(), 3);
        assert_eq!(ProofType::CreditScore.code(), 4);
        assert_eq!(ProofType::Composite.code(), 5);
    }

    #[test]
    fn test_serde_as_integer() {
        assert_eq!(serde_json::to_string(&ProofType::CreditScore).unwrap(), "4");
        let t: ProofType = serde_json::from_str("2").unwrap();
        assert_eq!(t, ProofType::Residency);
        assert!(serde_json::from_str::<ProofType>("9").is_err());
    }

    #[test]
    fn test_layouts() {
        assert_eq!(ProofType::Age.signal_count(), 6);
        assert_eq!(ProofType::Residency.signal_count(), 5);
        assert_eq!(ProofType::Composite.signal_count(), 13);
        assert_eq!(ProofType::Age.layout()[NULLIFIER_SIGNAL_INDEX], Signal::NullifierHash);
        assert_eq!(ProofType::Age.layout()[COMMITMENT_SIGNAL_INDEX], Signal::Commitment);
    }
}
