//! The proof envelope exchanged between holder and verifier.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

use super::proof_type::{ProofType, COMMITMENT_SIGNAL_INDEX, NULLIFIER_SIGNAL_INDEX};
use crate::field::field_to_bytes;

/// Wire form: `{proof, public_signals, nullifier_hash, commitment,
/// signature, timestamp, proof_type}` with hex byte strings and integer
/// proof-type codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofEnvelope {
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    #[serde(with = "crate::field::serde_hex_vec")]
    pub public_signals: Vec<Fr>,
    #[serde(with = "crate::field::serde_hex")]
    pub nullifier_hash: Fr,
    #[serde(with = "crate::field::serde_hex")]
    pub commitment: Fr,
    #[serde(with = "hex_bytes", default)]
    pub signature: Vec<u8>,
    /// Generation time, unix milliseconds.
    pub timestamp: u64,
    pub proof_type: ProofType,
}

/// Argument tuple for the external contract verification entry point, in
/// its parameter order: `(proof, publicInputs, signature, proofType,
/// nullifierHash, commitment)`.
pub type ContractTuple = (Vec<u8>, Vec<[u8; 32]>, Vec<u8>, u8, [u8; 32], [u8; 32]);

impl ProofEnvelope {
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// True when the out-of-band `nullifier_hash` and `commitment` fields
    /// match the values bound into the public signals.
    pub fn is_consistent(&self) -> bool {
        self.public_signals.get(NULLIFIER_SIGNAL_INDEX) == Some(&self.nullifier_hash)
            && self.public_signals.get(COMMITMENT_SIGNAL_INDEX) == Some(&self.commitment)
    }

    pub fn contract_tuple(&self) -> ContractTuple {
        (
            self.proof.clone(),
            self.public_signals.iter().map(field_to_bytes).collect(),
            self.signature.clone(),
            self.proof_type.code(),
            field_to_bytes(&self.nullifier_hash),
            field_to_bytes(&self.commitment),
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProofEnvelope {
        let nullifier = Fr::from(11u64);
        let commitment = Fr::from(22u64);
        ProofEnvelope {
            proof: vec![0xab; 4],
            public_signals: vec![Fr::from(1u64), nullifier, commitment, Fr::from(33u64)],
            nullifier_hash: nullifier,
            commitment,
            signature: vec![],
            timestamp: 1_700_000_000_000,
            proof_type: ProofType::Age,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "proof",
            "public_signals",
            "nullifier_hash",
            "commitment",
            "signature",
            "timestamp",
            "proof_type",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj["proof"], "abababab");
        assert_eq!(obj["proof_type"], 1);
        assert_eq!(obj["public_signals"].as_array().unwrap().len(), 4);
        assert_eq!(
            obj["nullifier_hash"].as_str().unwrap(),
            obj["public_signals"][1].as_str().unwrap()
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let env = sample();
        assert_eq!(ProofEnvelope::from_json(&env.to_json().unwrap()).unwrap(), env);
    }

    #[test]
    fn test_consistency_check() {
        let mut env = sample();
        assert!(env.is_consistent());
        env.commitment = Fr::from(99u64);
        assert!(!env.is_consistent());
    }

    #[test]
    fn test_contract_tuple_order() {
        let env = sample();
        let (proof, inputs, sig, ty, nullifier, commitment) = env.contract_tuple();
        assert_eq!(proof, env.proof);
        assert_eq!(inputs.len(), 4);
        assert!(sig.is_empty());
        assert_eq!(ty, 1);
        assert_eq!(nullifier, field_to_bytes(&env.nullifier_hash));
        assert_eq!(commitment, inputs[2]);
    }
}
