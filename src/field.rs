//! Canonical encoding of BN254 scalar field elements.
//!
//! Every field element that crosses the crate boundary is 32 big-endian
//! bytes (64 hex characters, optional `0x` prefix). Values at or above the
//! modulus are rejected rather than reduced.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use sha2::{Digest, Sha256};

/// Size of an encoded field element.
pub const FIELD_BYTES: usize = 32;

/// Errors raised while decoding field elements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("invalid field element: expected {FIELD_BYTES} bytes, got {0}")]
    WrongLength(usize),

    #[error("invalid field element: value is not below the field modulus")]
    NonCanonical,

    #[error("invalid field element hex: {0}")]
    InvalidHex(String),
}

/// Encode a field element as 32 big-endian bytes.
pub fn field_to_bytes(value: &Fr) -> [u8; FIELD_BYTES] {
    let be = value.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - be.len()..].copy_from_slice(&be);
    out
}

/// Decode 32 big-endian bytes, rejecting non-canonical values.
pub fn field_from_bytes(bytes: &[u8]) -> Result<Fr, FieldError> {
    if bytes.len() != FIELD_BYTES {
        return Err(FieldError::WrongLength(bytes.len()));
    }
    let value = Fr::from_be_bytes_mod_order(bytes);
    if field_to_bytes(&value)[..] != bytes[..] {
        return Err(FieldError::NonCanonical);
    }
    Ok(value)
}

pub fn field_to_hex(value: &Fr) -> String {
    hex::encode(field_to_bytes(value))
}

pub fn field_from_hex(s: &str) -> Result<Fr, FieldError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| FieldError::InvalidHex(e.to_string()))?;
    field_from_bytes(&bytes)
}

/// Map an arbitrary byte string (e.g. a document digest) into the field.
///
/// The input is hashed with SHA-256 and reduced modulo the field order, so
/// unlike [`field_from_bytes`] this never fails.
pub fn digest_to_field(data: &[u8]) -> Fr {
    let digest = Sha256::digest(data);
    Fr::from_be_bytes_mod_order(&digest)
}

/// Interpret a field element as a `u64` if it fits.
pub fn field_to_u64(value: &Fr) -> Option<u64> {
    let limbs = value.into_bigint().0;
    if limbs[1..].iter().all(|l| *l == 0) {
        Some(limbs[0])
    } else {
        None
    }
}

/// Serde adapter for a single field element as hex.
pub mod serde_hex {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&field_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let s = String::deserialize(deserializer)?;
        field_from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for a vector of field elements as hex strings.
pub mod serde_hex_vec {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&field_to_hex(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| field_from_hex(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
