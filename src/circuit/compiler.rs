//! Turns a (proof type, challenge) pair into the public constants and
//! signal layout of one circuit instance, and assigns witnesses to it.
//!
//! The verifier compiles the same challenge to recompute every
//! challenge-derived public signal, so nothing here may depend on the
//! holder's data.

use ark_bn254::Fr;
use std::fmt;

use super::identity::{IdentityCircuit, MembershipWitness, PrivateInputs};
use crate::commitment::aggregate;
use crate::field::field_to_u64;
use crate::merkle::{domain, MerklePath, MerkleTree, PoseidonHasher};
use crate::nullifier::derive_nullifier;
use crate::types::{
    shift_timestamp, Attribute, AttributeKind, AttributeWitness, Challenge, CompositeSelection,
    ProofType, Signal, WitnessError,
};
use crate::countries;

/// Allow-list tree depth compiled into every membership section.
pub const ALLOW_LIST_DEPTH: usize = 8;

/// Largest allow-list a challenge may carry.
pub const MAX_ALLOW_LIST: usize = 1 << ALLOW_LIST_DEPTH;

/// The predicate a witness failed; reported without revealing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    MinimumAge,
    Residency,
    Nationality,
    MinimumCreditScore,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Predicate::MinimumAge => "minimum age",
            Predicate::Residency => "residency allow-list",
            Predicate::Nationality => "nationality allow-list",
            Predicate::MinimumCreditScore => "minimum credit score",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("{0} allow-list is empty")]
    EmptyAllowList(Predicate),

    #[error("{predicate} allow-list has {len} entries, maximum is {MAX_ALLOW_LIST}")]
    AllowListTooLarge { predicate: Predicate, len: usize },

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    #[error(transparent)]
    Witness(#[from] WitnessError),

    #[error("witness does not satisfy the {0} predicate")]
    Unsatisfied(Predicate),
}

/// A sorted, de-duplicated set of country codes and its Merkle tree.
#[derive(Clone)]
pub struct AllowList {
    codes: Vec<u16>,
    tree: MerkleTree,
}

impl AllowList {
    pub fn new(codes: &[u16], predicate: Predicate) -> Result<Self, CompileError> {
        let mut codes = codes.to_vec();
        codes.sort_unstable();
        codes.dedup();

        if codes.is_empty() {
            return Err(CompileError::EmptyAllowList(predicate));
        }
        if codes.len() > MAX_ALLOW_LIST {
            return Err(CompileError::AllowListTooLarge {
                predicate,
                len: codes.len(),
            });
        }
        if let Some(bad) = codes.iter().find(|c| !countries::is_valid_code(**c)) {
            return Err(CompileError::InvalidChallenge(format!(
                "{predicate} allow-list contains invalid country code {bad}"
            )));
        }

        let hasher = PoseidonHasher::new();
        let leaves = codes
            .iter()
            .map(|c| leaf_for_code(&hasher, Fr::from(*c as u64)))
            .collect();
        let tree = MerkleTree::with_depth(leaves, ALLOW_LIST_DEPTH)
            .map_err(|e| CompileError::InvalidChallenge(e.to_string()))?;

        Ok(Self { codes, tree })
    }

    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn codes(&self) -> &[u16] {
        &self.codes
    }

    /// Path for an already field-encoded code, if it is on the list.
    pub fn path_for(&self, code: Fr) -> Option<MerklePath> {
        let leaf = leaf_for_code(self.tree.hasher(), code);
        self.tree.get_path_for_leaf(&leaf)
    }
}

/// `Poseidon(LEAF, code)`; keeps zero padding leaves from ever matching.
pub fn leaf_for_code(hasher: &PoseidonHasher, code: Fr) -> Fr {
    hasher.hash_tagged(domain::LEAF, &[code])
}

#[derive(Clone)]
pub struct AgeRule {
    pub enabled: bool,
    /// Shifted reference time.
    pub as_of: u64,
    pub min_age: u64,
}

#[derive(Clone)]
pub struct MembershipRule {
    pub enabled: bool,
    pub list: Option<AllowList>,
}

impl MembershipRule {
    fn root(&self) -> Fr {
        self.list.as_ref().map(AllowList::root).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ThresholdRule {
    pub enabled: bool,
    pub min_score: u64,
}

/// Everything the circuit needs from the challenge.
#[derive(Clone)]
pub struct CompiledPredicate {
    pub proof_type: ProofType,
    pub context: Fr,
    pub age: AgeRule,
    pub residency: MembershipRule,
    pub nationality: MembershipRule,
    pub credit: ThresholdRule,
}

/// A fully assigned circuit instance and its public outputs.
pub struct Assignment {
    pub circuit: IdentityCircuit,
    pub nullifier: Fr,
    pub commitment: Fr,
}

pub fn compile(proof_type: ProofType, challenge: &Challenge) -> Result<CompiledPredicate, CompileError> {
    if challenge.proof_type != proof_type {
        return Err(CompileError::InvalidChallenge(format!(
            "challenge is for {} proofs, not {proof_type}",
            challenge.proof_type
        )));
    }
    if challenge.expires_at_ms < challenge.issued_at_ms {
        return Err(CompileError::InvalidChallenge(
            "challenge expires before it is issued".into(),
        ));
    }

    let selection = match proof_type {
        ProofType::Composite => {
            if challenge.composite.is_empty() {
                return Err(CompileError::InvalidChallenge(
                    "composite challenge selects no predicate".into(),
                ));
            }
            challenge.composite
        }
        ProofType::Age => single(|s| s.age = true),
        ProofType::Residency => single(|s| s.residency = true),
        ProofType::Nationality => single(|s| s.nationality = true),
        ProofType::CreditScore => single(|s| s.credit_score = true),
    };

    let age = if selection.age {
        let as_of = shift_timestamp(challenge.as_of).ok_or_else(|| {
            CompileError::InvalidChallenge(format!("as_of {} is out of range", challenge.as_of))
        })?;
        AgeRule {
            enabled: true,
            as_of,
            min_age: challenge.min_age_seconds,
        }
    } else {
        AgeRule {
            enabled: false,
            as_of: 0,
            min_age: 0,
        }
    };

    let residency = MembershipRule {
        enabled: selection.residency,
        list: selection
            .residency
            .then(|| AllowList::new(&challenge.allowed_residency, Predicate::Residency))
            .transpose()?,
    };
    let nationality = MembershipRule {
        enabled: selection.nationality,
        list: selection
            .nationality
            .then(|| AllowList::new(&challenge.allowed_nationality, Predicate::Nationality))
            .transpose()?,
    };
    let credit = ThresholdRule {
        enabled: selection.credit_score,
        min_score: if selection.credit_score {
            challenge.min_credit_score
        } else {
            0
        },
    };

    Ok(CompiledPredicate {
        proof_type,
        context: challenge.context(),
        age,
        residency,
        nationality,
        credit,
    })
}

fn single(enable: impl FnOnce(&mut CompositeSelection)) -> CompositeSelection {
    let mut selection = CompositeSelection::default();
    enable(&mut selection);
    selection
}

fn flag(on: bool) -> Fr {
    Fr::from(on as u64)
}

impl CompiledPredicate {
    /// Public signals in layout order for the given outputs.
    pub fn public_signals(&self, nullifier: Fr, commitment: Fr) -> Vec<Fr> {
        self.proof_type
            .layout()
            .into_iter()
            .map(|signal| match signal {
                Signal::ProofType => Fr::from(self.proof_type.code() as u64),
                Signal::NullifierHash => nullifier,
                Signal::Commitment => commitment,
                Signal::ChallengeContext => self.context,
                Signal::AsOf => Fr::from(self.age.as_of),
                Signal::MinAge => Fr::from(self.age.min_age),
                Signal::AllowListRoot => match self.proof_type {
                    ProofType::Nationality => self.nationality.root(),
                    _ => self.residency.root(),
                },
                Signal::MinScore => Fr::from(self.credit.min_score),
                Signal::AgeEnabled => flag(self.age.enabled),
                Signal::ResidencyEnabled => flag(self.residency.enabled),
                Signal::ResidencyRoot => self.residency.root(),
                Signal::NationalityEnabled => flag(self.nationality.enabled),
                Signal::NationalityRoot => self.nationality.root(),
                Signal::CreditEnabled => flag(self.credit.enabled),
            })
            .collect()
    }

    /// Evaluate the enabled predicates natively and, when they hold, build
    /// the assigned circuit.
    pub fn assign(&self, witness: &AttributeWitness) -> Result<Assignment, AssignError> {
        let mut private = PrivateInputs::zeroed(ALLOW_LIST_DEPTH);
        private.secret_key = witness.secret_key;

        if self.age.enabled {
            let birth = *witness.require(AttributeKind::Birthdate)?;
            let slack = field_to_u64(&birth.value)
                .and_then(|b| self.age.as_of.checked_sub(b))
                .and_then(|d| d.checked_sub(self.age.min_age));
            if slack.is_none() {
                return Err(AssignError::Unsatisfied(Predicate::MinimumAge));
            }
            private.birth = birth;
        } else if self.proof_type == ProofType::Composite {
            private.birth = optional(witness, AttributeKind::Birthdate);
        }

        if let Some(member) = membership(
            &self.residency,
            witness,
            AttributeKind::Residency,
            Predicate::Residency,
        )? {
            private.residency = member;
        } else if self.proof_type == ProofType::Composite {
            private.residency.attribute = optional(witness, AttributeKind::Residency);
        }

        if let Some(member) = membership(
            &self.nationality,
            witness,
            AttributeKind::Nationality,
            Predicate::Nationality,
        )? {
            private.nationality = member;
        } else if self.proof_type == ProofType::Composite {
            private.nationality.attribute = optional(witness, AttributeKind::Nationality);
        }

        if self.credit.enabled {
            let score = *witness.require(AttributeKind::CreditScore)?;
            let meets = field_to_u64(&score.value).is_some_and(|s| s >= self.credit.min_score);
            if !meets {
                return Err(AssignError::Unsatisfied(Predicate::MinimumCreditScore));
            }
            private.credit_score = score;
        } else if self.proof_type == ProofType::Composite {
            private.credit_score = optional(witness, AttributeKind::CreditScore);
        }

        if self.proof_type == ProofType::Composite {
            private.document = optional(witness, AttributeKind::DocumentHash);
        }

        let commitment = match self.proof_type {
            ProofType::Age => private.birth.commitment().0,
            ProofType::Residency => private.residency.attribute.commitment().0,
            ProofType::Nationality => private.nationality.attribute.commitment().0,
            ProofType::CreditScore => private.credit_score.commitment().0,
            ProofType::Composite => {
                aggregate(&[
                    private.birth.commitment(),
                    private.residency.attribute.commitment(),
                    private.nationality.attribute.commitment(),
                    private.credit_score.commitment(),
                    private.document.commitment(),
                ])
                .0
            }
        };
        let nullifier = derive_nullifier(&witness.secret_key, self.proof_type, &self.context);

        let circuit = IdentityCircuit {
            poseidon_config: PoseidonHasher::new().config().clone(),
            proof_type: self.proof_type,
            public_signals: self.public_signals(nullifier, commitment),
            private,
            path_depth: ALLOW_LIST_DEPTH,
        };

        Ok(Assignment {
            circuit,
            nullifier,
            commitment,
        })
    }
}

fn optional(witness: &AttributeWitness, kind: AttributeKind) -> Attribute {
    witness.attribute(kind).copied().unwrap_or_else(Attribute::empty)
}

fn membership(
    rule: &MembershipRule,
    witness: &AttributeWitness,
    kind: AttributeKind,
    predicate: Predicate,
) -> Result<Option<MembershipWitness>, AssignError> {
    let Some(list) = rule.list.as_ref().filter(|_| rule.enabled) else {
        return Ok(None);
    };
    let attribute = *witness.require(kind)?;
    let path = list
        .path_for(attribute.value)
        .ok_or(AssignError::Unsatisfied(predicate))?;
    Ok(Some(MembershipWitness { attribute, path }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem};
    use chrono::NaiveDate;

    fn challenge(proof_type: ProofType) -> Challenge {
        Challenge::new(proof_type, Fr::from(4242u64), 7, 1_000, 60_000)
    }

    fn age_challenge() -> Challenge {
        challenge(ProofType::Age)
            .with_min_age_years(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 18)
    }

    fn holder() -> AttributeWitness {
        AttributeWitness::new(Fr::from(0xdead_beefu64))
            .with_birthdate(NaiveDate::from_ymd_opt(1995, 6, 15).unwrap())
            .unwrap()
            .with_residency(840)
            .unwrap()
            .with_nationality(124)
            .unwrap()
            .with_credit_score(720)
            .unwrap()
            .with_document_hash(b"passport-scan")
    }

    fn is_satisfied(assignment: Assignment) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        assignment.circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn test_age_circuit_satisfied() {
        let compiled = compile(ProofType::Age, &age_challenge()).unwrap();
        let witness = holder();
        let assignment = compiled.assign(&witness).unwrap();
        assert_eq!(
            Some(assignment.commitment),
            witness.commitment(AttributeKind::Birthdate).map(|c| c.0)
        );
        assert_eq!(assignment.circuit.public_signals[2], assignment.commitment);
        assert!(is_satisfied(assignment));
    }

    #[test]
    fn test_underage_rejected_natively() {
        let young = AttributeWitness::new(Fr::from(1u64))
            .with_birthdate(NaiveDate::from_ymd_opt(2015, 6, 15).unwrap())
            .unwrap();
        let compiled = compile(ProofType::Age, &age_challenge()).unwrap();
        assert!(matches!(
            compiled.assign(&young),
            Err(AssignError::Unsatisfied(Predicate::MinimumAge))
        ));
    }

    #[test]
    fn test_out_of_range_min_age_is_unsatisfiable() {
        let c = challenge(ProofType::Age)
            .with_min_age_years(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1_000_000);
        let compiled = compile(ProofType::Age, &c).unwrap();
        assert!(matches!(
            compiled.assign(&holder()),
            Err(AssignError::Unsatisfied(Predicate::MinimumAge))
        ));
    }

    #[test]
    fn test_underage_cannot_satisfy_circuit() {
        // Bypass the native check by forcing the birth attribute in.
        let compiled = compile(ProofType::Age, &age_challenge()).unwrap();
        let mut assignment = compiled.assign(&holder()).unwrap();
        let young = AttributeWitness::new(Fr::from(1u64))
            .with_birthdate(NaiveDate::from_ymd_opt(2015, 6, 15).unwrap())
            .unwrap();
        let birth = *young.attribute(AttributeKind::Birthdate).unwrap();
        assignment.circuit.private.birth = birth;
        assignment.circuit.public_signals[2] = birth.commitment().0;
        assert!(!is_satisfied(assignment));
    }

    #[test]
    fn test_residency_membership() {
        let c = challenge(ProofType::Residency).with_allowed_residency([840, 124]);
        let compiled = compile(ProofType::Residency, &c).unwrap();
        assert!(is_satisfied(compiled.assign(&holder()).unwrap()));

        let french = AttributeWitness::new(Fr::from(1u64)).with_residency(250).unwrap();
        assert!(matches!(
            compiled.assign(&french),
            Err(AssignError::Unsatisfied(Predicate::Residency))
        ));
    }

    #[test]
    fn test_nationality_and_credit() {
        let c = challenge(ProofType::Nationality).with_allowed_nationality([124]);
        let compiled = compile(ProofType::Nationality, &c).unwrap();
        assert!(is_satisfied(compiled.assign(&holder()).unwrap()));

        let c = challenge(ProofType::CreditScore).with_min_credit_score(700);
        let compiled = compile(ProofType::CreditScore, &c).unwrap();
        assert!(is_satisfied(compiled.assign(&holder()).unwrap()));

        let c = challenge(ProofType::CreditScore).with_min_credit_score(721);
        let compiled = compile(ProofType::CreditScore, &c).unwrap();
        assert!(matches!(
            compiled.assign(&holder()),
            Err(AssignError::Unsatisfied(Predicate::MinimumCreditScore))
        ));
    }

    #[test]
    fn test_composite_partial_selection() {
        let c = challenge(ProofType::Composite)
            .with_min_age_years(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 21)
            .with_allowed_residency([840])
            .with_composite(CompositeSelection {
                age: true,
                residency: true,
                nationality: false,
                credit_score: false,
            });
        let compiled = compile(ProofType::Composite, &c).unwrap();
        let signals = compiled.public_signals(Fr::from(0u64), Fr::from(0u64));
        assert_eq!(signals.len(), ProofType::Composite.signal_count());
        // nationality_on and its root are zero when unselected
        assert_eq!(signals[9], Fr::from(0u64));
        assert_eq!(signals[10], Fr::from(0u64));

        let partial = AttributeWitness::new(Fr::from(5u64))
            .with_birthdate(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
            .unwrap()
            .with_residency(840)
            .unwrap();
        assert!(is_satisfied(compiled.assign(&partial).unwrap()));
        assert!(is_satisfied(compiled.assign(&holder()).unwrap()));
    }

    #[test]
    fn test_compile_errors() {
        let c = challenge(ProofType::Residency);
        assert_eq!(
            compile(ProofType::Residency, &c).err(),
            Some(CompileError::EmptyAllowList(Predicate::Residency))
        );

        let many: Vec<u16> = (1..=300).collect();
        let c = challenge(ProofType::Nationality).with_allowed_nationality(many);
        assert!(matches!(
            compile(ProofType::Nationality, &c),
            Err(CompileError::AllowListTooLarge { len: 300, .. })
        ));

        let c = challenge(ProofType::Composite);
        assert!(matches!(
            compile(ProofType::Composite, &c),
            Err(CompileError::InvalidChallenge(_))
        ));

        assert!(matches!(
            compile(ProofType::Age, &challenge(ProofType::CreditScore)),
            Err(CompileError::InvalidChallenge(_))
        ));
    }

    #[test]
    fn test_allow_list_is_order_independent() {
        let a = AllowList::new(&[840, 124, 840], Predicate::Residency).unwrap();
        let b = AllowList::new(&[124, 840], Predicate::Residency).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.codes(), &[124, 840]);
    }

    #[test]
    fn test_missing_attribute() {
        let c = challenge(ProofType::CreditScore).with_min_credit_score(1);
        let compiled = compile(ProofType::CreditScore, &c).unwrap();
        let empty = AttributeWitness::new(Fr::from(1u64));
        assert!(matches!(
            compiled.assign(&empty),
            Err(AssignError::Witness(WitnessError::MissingAttribute(
                AttributeKind::CreditScore
            )))
        ));
    }
}
