//! Binding envelopes to an enrolled device credential.
//!
//! The device signs the canonical envelope bytes followed by its
//! authenticator counter. The envelope's `signature` field carries
//! `counter (u32 BE) || ed25519 signature`. A verifier accepts a signature
//! only from an enrolled, unrevoked credential whose counter strictly
//! increases; a counter that does not means the key was cloned.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, info};

use crate::field::field_to_bytes;
use crate::types::ProofEnvelope;

/// Prefix of every signed envelope message.
pub const ENVELOPE_DOMAIN: &[u8] = b"zkid-envelope-v1";

pub const COUNTER_BYTES: usize = 4;

/// Length of the envelope `signature` field once signed.
pub const ASSERTION_BYTES: usize = COUNTER_BYTES + SIGNATURE_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("authenticator counter rollback: stored {stored}, presented {presented}")]
    CounterRollback { stored: u32, presented: u32 },

    #[error("unknown credential {0}")]
    UnknownCredential(String),

    #[error("credential {0} is revoked")]
    CredentialRevoked(String),

    #[error("credential {0} is already enrolled")]
    AlreadyEnrolled(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("authenticator counter exhausted")]
    CounterExhausted,
}

/// Deterministic, order-stable serialization of everything in an envelope
/// except its signature.
pub fn canonical_bytes(envelope: &ProofEnvelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        ENVELOPE_DOMAIN.len() + 1 + 8 + 4 + envelope.proof.len() + 4
            + 32 * (envelope.public_signals.len() + 2),
    );
    out.extend_from_slice(ENVELOPE_DOMAIN);
    out.push(envelope.proof_type.code());
    out.extend_from_slice(&envelope.timestamp.to_be_bytes());
    out.extend_from_slice(&(envelope.proof.len() as u32).to_be_bytes());
    out.extend_from_slice(&envelope.proof);
    out.extend_from_slice(&(envelope.public_signals.len() as u32).to_be_bytes());
    for signal in &envelope.public_signals {
        out.extend_from_slice(&field_to_bytes(signal));
    }
    out.extend_from_slice(&field_to_bytes(&envelope.nullifier_hash));
    out.extend_from_slice(&field_to_bytes(&envelope.commitment));
    out
}

/// The exact bytes an authenticator signs for `counter`.
pub fn signed_message(payload: &[u8], counter: u32) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + COUNTER_BYTES);
    message.extend_from_slice(payload);
    message.extend_from_slice(&counter.to_be_bytes());
    message
}

/// One authenticator response.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Assertion {
    pub counter: u32,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl Assertion {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ASSERTION_BYTES);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CredentialError> {
        if bytes.len() != ASSERTION_BYTES {
            return Err(CredentialError::SignatureInvalid(format!(
                "expected {ASSERTION_BYTES} signature bytes, got {}",
                bytes.len()
            )));
        }
        let (counter, signature) = bytes.split_at(COUNTER_BYTES);
        let mut counter_be = [0u8; COUNTER_BYTES];
        counter_be.copy_from_slice(counter);
        let mut sig = [0u8; SIGNATURE_LENGTH];
        sig.copy_from_slice(signature);
        Ok(Self {
            counter: u32::from_be_bytes(counter_be),
            signature: sig,
        })
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Assertion(counter={}, sig={}...)",
            self.counter,
            &hex::encode(self.signature)[..16]
        )
    }
}

/// A device-held signing credential.
pub trait Authenticator: Send + Sync {
    fn credential_id(&self) -> &str;

    fn public_key(&self) -> [u8; 32];

    /// The last counter value used. Enrolment starts the stored counter here.
    fn counter(&self) -> u32;

    /// Sign `payload` with the next counter value.
    fn sign(&self, payload: &[u8]) -> Result<Assertion, CredentialError>;
}

/// Software Ed25519 authenticator with a monotonic counter.
pub struct DeviceAuthenticator {
    credential_id: String,
    signing_key: SigningKey,
    counter: AtomicU32,
}

impl DeviceAuthenticator {
    pub fn generate(credential_id: impl Into<String>) -> Self {
        Self::from_signing_key(credential_id, SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(credential_id: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self::from_signing_key(credential_id, SigningKey::from_bytes(seed))
    }

    fn from_signing_key(credential_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            credential_id: credential_id.into(),
            signing_key,
            counter: AtomicU32::new(0),
        }
    }

    /// Start counting from `counter`; the next assertion uses `counter + 1`.
    pub fn with_counter(self, counter: u32) -> Self {
        self.counter.store(counter, Ordering::SeqCst);
        self
    }
}

impl Authenticator for DeviceAuthenticator {
    fn credential_id(&self) -> &str {
        &self.credential_id
    }

    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn counter(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    fn sign(&self, payload: &[u8]) -> Result<Assertion, CredentialError> {
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_add(1))
            .map_err(|_| CredentialError::CounterExhausted)?;
        let counter = previous + 1;
        let signature = self.signing_key.sign(&signed_message(payload, counter));
        Ok(Assertion {
            counter,
            signature: signature.to_bytes(),
        })
    }
}

/// Sign `envelope` in place of any existing signature.
pub fn sign_envelope(
    mut envelope: ProofEnvelope,
    authenticator: &dyn Authenticator,
) -> Result<ProofEnvelope, CredentialError> {
    let assertion = authenticator.sign(&canonical_bytes(&envelope))?;
    envelope.signature = assertion.to_bytes();
    debug!(
        credential_id = authenticator.credential_id(),
        counter = assertion.counter,
        "envelope signed"
    );
    Ok(envelope)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledCredential {
    pub credential_id: String,
    pub public_key: [u8; 32],
    /// Highest counter accepted so far.
    pub counter: u32,
    pub revoked: bool,
}

/// Credentials known to a verifier.
#[derive(Default)]
pub struct CredentialRegistry {
    credentials: Mutex<HashMap<String, EnrolledCredential>>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `public_key` under `credential_id`. Only assertions with a
    /// counter above `counter` are accepted afterwards.
    pub fn enroll(
        &self,
        credential_id: &str,
        public_key: [u8; 32],
        counter: u32,
    ) -> Result<(), CredentialError> {
        VerifyingKey::from_bytes(&public_key)
            .map_err(|e| CredentialError::InvalidPublicKey(e.to_string()))?;

        let mut credentials = self.credentials.lock();
        if credentials.contains_key(credential_id) {
            return Err(CredentialError::AlreadyEnrolled(credential_id.to_string()));
        }
        credentials.insert(
            credential_id.to_string(),
            EnrolledCredential {
                credential_id: credential_id.to_string(),
                public_key,
                counter,
                revoked: false,
            },
        );
        info!(credential_id, counter, "credential enrolled");
        Ok(())
    }

    pub fn enroll_authenticator(&self, authenticator: &dyn Authenticator) -> Result<(), CredentialError> {
        self.enroll(
            authenticator.credential_id(),
            authenticator.public_key(),
            authenticator.counter(),
        )
    }

    pub fn revoke(&self, credential_id: &str) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock();
        let credential = credentials
            .get_mut(credential_id)
            .ok_or_else(|| CredentialError::UnknownCredential(credential_id.to_string()))?;
        credential.revoked = true;
        info!(credential_id, "credential revoked");
        Ok(())
    }

    pub fn get(&self, credential_id: &str) -> Option<EnrolledCredential> {
        self.credentials.lock().get(credential_id).cloned()
    }

    /// Check the signature algebra only; counters are left untouched.
    pub fn check_signature(
        &self,
        envelope: &ProofEnvelope,
        credential_id: &str,
    ) -> Result<Assertion, CredentialError> {
        let credential = self.active(credential_id)?;
        if !envelope.is_signed() {
            return Err(CredentialError::SignatureInvalid("envelope is unsigned".into()));
        }
        let assertion = Assertion::from_bytes(&envelope.signature)?;

        let key = VerifyingKey::from_bytes(&credential.public_key)
            .map_err(|e| CredentialError::InvalidPublicKey(e.to_string()))?;
        let signature = Signature::from_bytes(&assertion.signature);
        let message = signed_message(&canonical_bytes(envelope), assertion.counter);
        key.verify_strict(&message, &signature)
            .map_err(|e| CredentialError::SignatureInvalid(e.to_string()))?;

        Ok(assertion)
    }

    /// Record `presented` as the credential's counter if it is strictly
    /// greater than the stored one.
    pub fn advance_counter(&self, credential_id: &str, presented: u32) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock();
        let credential = credentials
            .get_mut(credential_id)
            .ok_or_else(|| CredentialError::UnknownCredential(credential_id.to_string()))?;
        if credential.revoked {
            return Err(CredentialError::CredentialRevoked(credential_id.to_string()));
        }
        if presented <= credential.counter {
            error!(
                credential_id,
                stored = credential.counter,
                presented,
                "authenticator counter did not increase; possible cloned credential"
            );
            return Err(CredentialError::CounterRollback {
                stored: credential.counter,
                presented,
            });
        }
        credential.counter = presented;
        Ok(())
    }

    /// Full check: signature algebra, then the counter.
    pub fn verify_signature(
        &self,
        envelope: &ProofEnvelope,
        credential_id: &str,
    ) -> Result<(), CredentialError> {
        let assertion = self.check_signature(envelope, credential_id)?;
        self.advance_counter(credential_id, assertion.counter)
    }

    fn active(&self, credential_id: &str) -> Result<EnrolledCredential, CredentialError> {
        let credential = self
            .get(credential_id)
            .ok_or_else(|| CredentialError::UnknownCredential(credential_id.to_string()))?;
        if credential.revoked {
            return Err(CredentialError::CredentialRevoked(credential_id.to_string()));
        }
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProofType;
    use ark_bn254::Fr;

    fn envelope() -> ProofEnvelope {
        ProofEnvelope {
            proof: vec![7u8; 128],
            public_signals: vec![Fr::from(4u64), Fr::from(10u64), Fr::from(20u64), Fr::from(30u64), Fr::from(650u64)],
            nullifier_hash: Fr::from(10u64),
            commitment: Fr::from(20u64),
            signature: Vec::new(),
            timestamp: 1_704_067_200_000,
            proof_type: ProofType::CreditScore,
        }
    }

    fn setup() -> (CredentialRegistry, DeviceAuthenticator) {
        let device = DeviceAuthenticator::from_seed("phone-1", &[9u8; 32]);
        let registry = CredentialRegistry::new();
        registry.enroll_authenticator(&device).unwrap();
        (registry, device)
    }

    #[test]
    fn test_canonical_bytes_exclude_signature() {
        let env = envelope();
        let mut signed = env.clone();
        signed.signature = vec![1, 2, 3];
        assert_eq!(canonical_bytes(&env), canonical_bytes(&signed));
        assert!(canonical_bytes(&env).starts_with(ENVELOPE_DOMAIN));

        let mut other = env.clone();
        other.timestamp += 1;
        assert_ne!(canonical_bytes(&env), canonical_bytes(&other));
    }

    #[test]
    fn test_sign_and_verify() {
        let (registry, device) = setup();
        let signed = sign_envelope(envelope(), &device).unwrap();
        assert_eq!(signed.signature.len(), ASSERTION_BYTES);
        registry.verify_signature(&signed, "phone-1").unwrap();
        assert_eq!(registry.get("phone-1").unwrap().counter, 1);
    }

    #[test]
    fn test_tampered_envelope_rejected() {
        let (registry, device) = setup();
        let mut signed = sign_envelope(envelope(), &device).unwrap();
        signed.public_signals[4] = Fr::from(651u64);
        assert!(matches!(
            registry.verify_signature(&signed, "phone-1"),
            Err(CredentialError::SignatureInvalid(_))
        ));
        assert!(matches!(
            registry.verify_signature(&envelope(), "phone-1"),
            Err(CredentialError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_enrolment_starts_at_device_counter() {
        let device = DeviceAuthenticator::from_seed("phone-2", &[3u8; 32]).with_counter(10);
        let registry = CredentialRegistry::new();
        registry.enroll_authenticator(&device).unwrap();
        assert_eq!(registry.get("phone-2").unwrap().counter, 10);

        let signed = sign_envelope(envelope(), &device).unwrap();
        registry.verify_signature(&signed, "phone-2").unwrap();
        assert_eq!(registry.get("phone-2").unwrap().counter, 11);
    }

    #[test]
    fn test_enrolment_rejects_counters_below_start() {
        let device = DeviceAuthenticator::from_seed("phone-3", &[4u8; 32]);
        let registry = CredentialRegistry::new();
        registry
            .enroll("phone-3", device.public_key(), 5)
            .unwrap();

        let signed = sign_envelope(envelope(), &device).unwrap();
        assert_eq!(
            registry.verify_signature(&signed, "phone-3"),
            Err(CredentialError::CounterRollback {
                stored: 5,
                presented: 1
            })
        );
    }

    #[test]
    fn test_counter_rollback_detected() {
        let (registry, device) = setup();
        let first = sign_envelope(envelope(), &device).unwrap();
        let second = sign_envelope(envelope(), &device).unwrap();
        registry.verify_signature(&second, "phone-1").unwrap();
        assert_eq!(
            registry.verify_signature(&first, "phone-1"),
            Err(CredentialError::CounterRollback {
                stored: 2,
                presented: 1
            })
        );

        // A clone of the key that restarted its counter.
        let clone = DeviceAuthenticator::from_seed("phone-1", &[9u8; 32]);
        let cloned = sign_envelope(envelope(), &clone).unwrap();
        assert!(matches!(
            registry.verify_signature(&cloned, "phone-1"),
            Err(CredentialError::CounterRollback { stored: 2, presented: 1 })
        ));
    }

    #[test]
    fn test_unknown_and_revoked() {
        let (registry, device) = setup();
        let signed = sign_envelope(envelope(), &device).unwrap();
        assert_eq!(
            registry.verify_signature(&signed, "laptop"),
            Err(CredentialError::UnknownCredential("laptop".into()))
        );
        registry.revoke("phone-1").unwrap();
        assert_eq!(
            registry.verify_signature(&signed, "phone-1"),
            Err(CredentialError::CredentialRevoked("phone-1".into()))
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (registry, _) = setup();
        let impostor = DeviceAuthenticator::generate("phone-1");
        let signed = sign_envelope(envelope(), &impostor).unwrap();
        assert!(matches!(
            registry.verify_signature(&signed, "phone-1"),
            Err(CredentialError::SignatureInvalid(_))
        ));
        assert_eq!(
            registry.enroll_authenticator(&impostor),
            Err(CredentialError::AlreadyEnrolled("phone-1".into()))
        );
    }

    #[test]
    fn test_counter_exhaustion() {
        let device = DeviceAuthenticator::generate("d").with_counter(u32::MAX);
        assert_eq!(device.sign(b"x"), Err(CredentialError::CounterExhausted));
    }
}
