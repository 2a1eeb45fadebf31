//! Verifier-issued challenges.

use ark_bn254::Fr;
use chrono::{Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::proof_type::ProofType;
use crate::merkle::{domain, PoseidonHasher};

/// Seconds between 1900-01-01 and the Unix epoch. Timestamps are shifted by
/// this offset before entering the field so pre-1970 birthdates stay
/// non-negative.
pub const EPOCH_SHIFT_SECS: i64 = 2_208_988_800;

/// Shift a unix timestamp (seconds) into the circuit's time domain.
pub fn shift_timestamp(unix_secs: i64) -> Option<u64> {
    unix_secs
        .checked_add(EPOCH_SHIFT_SECS)
        .and_then(|v| u64::try_from(v).ok())
}

/// Which sub-predicates a composite proof covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSelection {
    pub age: bool,
    pub residency: bool,
    pub nationality: bool,
    pub credit_score: bool,
}

impl CompositeSelection {
    pub fn all() -> Self {
        Self {
            age: true,
            residency: true,
            nationality: true,
            credit_score: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.age || self.residency || self.nationality || self.credit_score)
    }
}

/// Public predicate issued by a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub proof_type: ProofType,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    /// Reference time for age predicates, unix seconds.
    pub as_of: i64,
    #[serde(default)]
    pub min_age_seconds: u64,
    #[serde(default)]
    pub allowed_residency: Vec<u16>,
    #[serde(default)]
    pub allowed_nationality: Vec<u16>,
    #[serde(default)]
    pub min_credit_score: u64,
    #[serde(default)]
    pub composite: CompositeSelection,
    #[serde(with = "crate::field::serde_hex")]
    pub nullifier_seed: Fr,
    pub epoch: u64,
}

impl Challenge {
    /// A challenge with an empty predicate and the given validity window.
    pub fn new(
        proof_type: ProofType,
        nullifier_seed: Fr,
        epoch: u64,
        issued_at_ms: u64,
        expires_at_ms: u64,
    ) -> Self {
        Self {
            proof_type,
            issued_at_ms,
            expires_at_ms,
            as_of: (issued_at_ms / 1000) as i64,
            min_age_seconds: 0,
            allowed_residency: Vec::new(),
            allowed_nationality: Vec::new(),
            min_credit_score: 0,
            composite: CompositeSelection::default(),
            nullifier_seed,
            epoch,
        }
    }

    /// Require an age of at least `years` calendar years as of `date`.
    ///
    /// A threshold date outside the calendar's range saturates the minimum
    /// age to `u64::MAX`, which no holder satisfies.
    pub fn with_min_age_years(mut self, date: NaiveDate, years: u32) -> Self {
        self.as_of = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        self.min_age_seconds = date
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp())
            .and_then(|threshold| u64::try_from(self.as_of - threshold).ok())
            .unwrap_or(u64::MAX);
        self
    }

    pub fn with_min_age_seconds(mut self, as_of: i64, min_age_seconds: u64) -> Self {
        self.as_of = as_of;
        self.min_age_seconds = min_age_seconds;
        self
    }

    pub fn with_allowed_residency(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_residency = codes.into_iter().collect();
        self
    }

    pub fn with_allowed_nationality(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_nationality = codes.into_iter().collect();
        self
    }

    pub fn with_min_credit_score(mut self, score: u64) -> Self {
        self.min_credit_score = score;
        self
    }

    pub fn with_composite(mut self, selection: CompositeSelection) -> Self {
        self.composite = selection;
        self
    }

    /// `Poseidon(CHALLENGE, nullifier_seed, epoch)`: the context nullifiers
    /// are scoped to.
    pub fn context(&self) -> Fr {
        PoseidonHasher::new().hash_tagged(
            domain::CHALLENGE,
            &[self.nullifier_seed, Fr::from(self.epoch)],
        )
    }

    /// Whether `at_ms` falls inside the validity window, widened by `skew_ms`
    /// on both ends.
    pub fn is_open_at(&self, at_ms: u64, skew_ms: u64) -> bool {
        at_ms.saturating_add(skew_ms) >= self.issued_at_ms
            && at_ms <= self.expires_at_ms.saturating_add(skew_ms)
    }
}
