//! Private attribute witness.
//!
//! Values are validated and field-encoded on the way in so that anything
//! the circuit cannot represent is rejected here, before any proving work.

use ark_bn254::Fr;
use chrono::NaiveDate;
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroize;

use super::challenge::shift_timestamp;
use crate::commitment::{commit, random_nonce, Commitment};
use crate::countries;
use crate::field::digest_to_field;

/// Upper bound accepted for credit scores.
pub const MAX_CREDIT_SCORE: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Birthdate,
    Nationality,
    Residency,
    DocumentHash,
    CreditScore,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttributeKind::Birthdate => "birthdate",
            AttributeKind::Nationality => "nationality",
            AttributeKind::Residency => "residency",
            AttributeKind::DocumentHash => "document_hash",
            AttributeKind::CreditScore => "credit_score",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WitnessError {
    #[error("birthdate {0} is outside the representable range")]
    BirthdateOutOfRange(i64),

    #[error("country code {0} is not a valid ISO 3166-1 numeric code")]
    InvalidCountryCode(u16),

    #[error("unknown country {0:?}")]
    UnknownCountry(String),

    #[error("credit score {0} exceeds maximum {MAX_CREDIT_SCORE}")]
    CreditScoreOutOfRange(u64),

    #[error("attribute {0} is required but missing")]
    MissingAttribute(AttributeKind),
}

/// One field-encoded attribute and its blinding nonce.
#[derive(Clone, Copy)]
pub struct Attribute {
    pub(crate) value: Fr,
    pub(crate) nonce: Fr,
}

impl Attribute {
    pub fn commitment(&self) -> Commitment {
        commit(&self.value, &self.nonce)
    }

    pub(crate) fn empty() -> Self {
        Self {
            value: Fr::from(0u64),
            nonce: Fr::from(0u64),
        }
    }
}

impl Zeroize for Attribute {
    fn zeroize(&mut self) {
        self.value.zeroize();
        self.nonce.zeroize();
    }
}

/// Everything a holder keeps private when proving.
#[derive(Clone)]
pub struct AttributeWitness {
    pub(crate) secret_key: Fr,
    pub(crate) birthdate: Option<Attribute>,
    pub(crate) nationality: Option<Attribute>,
    pub(crate) residency: Option<Attribute>,
    pub(crate) document_hash: Option<Attribute>,
    pub(crate) credit_score: Option<Attribute>,
}

impl AttributeWitness {
    pub fn new(secret_key: Fr) -> Self {
        Self {
            secret_key,
            birthdate: None,
            nationality: None,
            residency: None,
            document_hash: None,
            credit_score: None,
        }
    }

    fn blinded(value: Fr) -> Attribute {
        Attribute {
            value,
            nonce: random_nonce(&mut OsRng),
        }
    }

    /// Birth instant as unix seconds.
    pub fn with_birth_timestamp(mut self, unix_secs: i64) -> Result<Self, WitnessError> {
        let shifted =
            shift_timestamp(unix_secs).ok_or(WitnessError::BirthdateOutOfRange(unix_secs))?;
        self.birthdate = Some(Self::blinded(Fr::from(shifted)));
        Ok(self)
    }

    pub fn with_birthdate(self, date: NaiveDate) -> Result<Self, WitnessError> {
        let secs = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or(WitnessError::BirthdateOutOfRange(i64::MIN))?;
        self.with_birth_timestamp(secs)
    }

    pub fn with_nationality(mut self, code: u16) -> Result<Self, WitnessError> {
        if !countries::is_valid_code(code) {
            return Err(WitnessError::InvalidCountryCode(code));
        }
        self.nationality = Some(Self::blinded(Fr::from(code as u64)));
        Ok(self)
    }

    pub fn with_residency(mut self, code: u16) -> Result<Self, WitnessError> {
        if !countries::is_valid_code(code) {
            return Err(WitnessError::InvalidCountryCode(code));
        }
        self.residency = Some(Self::blinded(Fr::from(code as u64)));
        Ok(self)
    }

    /// Nationality by country name, alpha-2 code or alias.
    pub fn with_nationality_name(self, country: &str) -> Result<Self, WitnessError> {
        self.with_nationality(Self::country_code(country)?)
    }

    /// Residency by country name, alpha-2 code or alias.
    pub fn with_residency_name(self, country: &str) -> Result<Self, WitnessError> {
        self.with_residency(Self::country_code(country)?)
    }

    fn country_code(country: &str) -> Result<u16, WitnessError> {
        countries::resolve(country)
            .map(|c| c.code)
            .ok_or_else(|| WitnessError::UnknownCountry(country.to_string()))
    }

    /// Raw document digest bytes; mapped into the field with SHA-256.
    pub fn with_document_hash(mut self, digest: &[u8]) -> Self {
        self.document_hash = Some(Self::blinded(digest_to_field(digest)));
        self
    }

    pub fn with_credit_score(mut self, score: u64) -> Result<Self, WitnessError> {
        if score > MAX_CREDIT_SCORE {
            return Err(WitnessError::CreditScoreOutOfRange(score));
        }
        self.credit_score = Some(Self::blinded(Fr::from(score)));
        Ok(self)
    }

    /// Replace the random nonce of an attribute, e.g. to re-prove against a
    /// commitment stored earlier.
    pub fn with_nonce(mut self, kind: AttributeKind, nonce: Fr) -> Result<Self, WitnessError> {
        let slot = self
            .slot_mut(kind)
            .as_mut()
            .ok_or(WitnessError::MissingAttribute(kind))?;
        slot.nonce = nonce;
        Ok(self)
    }

    pub fn attribute(&self, kind: AttributeKind) -> Option<&Attribute> {
        match kind {
            AttributeKind::Birthdate => self.birthdate.as_ref(),
            AttributeKind::Nationality => self.nationality.as_ref(),
            AttributeKind::Residency => self.residency.as_ref(),
            AttributeKind::DocumentHash => self.document_hash.as_ref(),
            AttributeKind::CreditScore => self.credit_score.as_ref(),
        }
    }

    pub(crate) fn require(&self, kind: AttributeKind) -> Result<&Attribute, WitnessError> {
        self.attribute(kind).ok_or(WitnessError::MissingAttribute(kind))
    }

    fn slot_mut(&mut self, kind: AttributeKind) -> &mut Option<Attribute> {
        match kind {
            AttributeKind::Birthdate => &mut self.birthdate,
            AttributeKind::Nationality => &mut self.nationality,
            AttributeKind::Residency => &mut self.residency,
            AttributeKind::DocumentHash => &mut self.document_hash,
            AttributeKind::CreditScore => &mut self.credit_score,
        }
    }

    /// Commitment to one attribute, for storing alongside an envelope.
    pub fn commitment(&self, kind: AttributeKind) -> Option<Commitment> {
        self.attribute(kind).map(Attribute::commitment)
    }

    /// The nonce of an attribute, needed later to open its commitment.
    pub fn nonce(&self, kind: AttributeKind) -> Option<Fr> {
        self.attribute(kind).map(|a| a.nonce)
    }
}

impl fmt::Debug for AttributeWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeWitness")
            .field("birthdate", &self.birthdate.is_some())
            .field("nationality", &self.nationality.is_some())
            .field("residency", &self.residency.is_some())
            .field("document_hash", &self.document_hash.is_some())
            .field("credit_score", &self.credit_score.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for AttributeWitness {
    fn drop(&mut self) {
        self.secret_key.zeroize();
        for slot in [
            &mut self.birthdate,
            &mut self.nationality,
            &mut self.residency,
            &mut self.document_hash,
            &mut self.credit_score,
        ] {
            if let Some(attr) = slot.as_mut() {
                attr.zeroize();
            }
        }
    }
}
