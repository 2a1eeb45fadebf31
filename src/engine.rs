//! The proof engine: generation, verification, replay protection and
//! credential binding behind one handle.

use ark_bn254::Fr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{EngineConfig, KeysConfig, RegistryBackend};
use crate::credential::{sign_envelope, Authenticator, CredentialRegistry};
use crate::error::{EngineError, EngineResult};
use crate::keys::{self, KeyResult, KeyRing};
use crate::nullifier::{self, MarkOutcome, NullifierRegistry, SledNullifierStore};
use crate::prover::Prover;
use crate::telemetry;
use crate::types::{AttributeWitness, Challenge, ProofEnvelope, ProofType};
use crate::verifier::{VerificationOutcome, Verifier};

pub struct ProofEngine {
    keys: Arc<KeyRing>,
    prover: Prover,
    verifier: Verifier,
    nullifiers: NullifierRegistry,
    credentials: Arc<CredentialRegistry>,
}

impl ProofEngine {
    pub fn new(keys: Arc<KeyRing>, nullifiers: NullifierRegistry) -> Self {
        Self {
            prover: Prover::new(keys.clone()),
            verifier: Verifier::new(keys.clone()),
            keys,
            nullifiers,
            credentials: Arc::new(CredentialRegistry::new()),
        }
    }

    pub fn with_clock_skew(mut self, clock_skew_ms: u64) -> Self {
        self.prover = self.prover.with_clock_skew(clock_skew_ms);
        self.verifier = self.verifier.with_clock_skew(clock_skew_ms);
        self
    }

    /// Share a credential registry with other engines.
    pub fn with_credentials(mut self, credentials: Arc<CredentialRegistry>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Build an engine from configuration: logging, the process-wide key
    /// ring and the configured nullifier backend.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        telemetry::init_logging(&config.logging);

        let keys = keys::install_or_get(|| load_or_setup(&config.keys))?;

        let nullifiers = match config.registry.backend {
            RegistryBackend::Memory => NullifierRegistry::in_memory(),
            RegistryBackend::Sled => NullifierRegistry::new(Arc::new(SledNullifierStore::open(
                &config.registry.path,
            )?)),
        };

        info!(
            backend = ?config.registry.backend,
            proof_types = ?keys.proof_types(),
            "proof engine ready"
        );
        Ok(Self::new(keys, nullifiers).with_clock_skew(config.challenge.clock_skew_ms))
    }

    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    pub fn nullifiers(&self) -> &NullifierRegistry {
        &self.nullifiers
    }

    pub fn credentials(&self) -> &CredentialRegistry {
        &self.credentials
    }

    pub fn generate_proof(
        &self,
        proof_type: ProofType,
        witness: &AttributeWitness,
        challenge: &Challenge,
    ) -> EngineResult<ProofEnvelope> {
        Ok(self.prover.generate(proof_type, witness, challenge)?)
    }

    pub fn generate_proof_at(
        &self,
        proof_type: ProofType,
        witness: &AttributeWitness,
        challenge: &Challenge,
        now_ms: u64,
    ) -> EngineResult<ProofEnvelope> {
        Ok(self.prover.generate_at(proof_type, witness, challenge, now_ms)?)
    }

    pub fn sign_envelope(
        &self,
        envelope: ProofEnvelope,
        authenticator: &dyn Authenticator,
    ) -> EngineResult<ProofEnvelope> {
        Ok(sign_envelope(envelope, authenticator)?)
    }

    /// Pure verification; consumes nothing.
    pub fn verify(&self, envelope: &ProofEnvelope, challenge: &Challenge) -> EngineResult<()> {
        Ok(self.verifier.verify(envelope, challenge)?)
    }

    pub fn verify_proof(&self, envelope: &ProofEnvelope, challenge: &Challenge) -> VerificationOutcome {
        self.verifier.verify_proof(envelope, challenge)
    }

    /// Verify and consume the nullifier, without credential binding.
    pub fn redeem(&self, envelope: &ProofEnvelope, challenge: &Challenge) -> EngineResult<()> {
        self.verifier.verify(envelope, challenge)?;
        self.mark(&envelope.nullifier_hash)
    }

    /// Full acceptance of a credential-bound envelope:
    ///
    /// 1. the proof verifies against `challenge`,
    /// 2. the signature is valid for an enrolled, unrevoked credential,
    /// 3. the nullifier is atomically marked (a duplicate is `ReplayDetected`),
    /// 4. the credential's slot for this proof type and challenge context is
    ///    atomically marked, so one credential redeems a challenge once no
    ///    matter which secret key produced the proof,
    /// 5. the authenticator counter advances.
    ///
    /// Marks are never undone. An envelope that fails the counter check has
    /// still consumed its nullifier and the credential's slot; a rollback
    /// means the credential is compromised and is reported as such.
    pub fn accept(
        &self,
        envelope: &ProofEnvelope,
        challenge: &Challenge,
        credential_id: &str,
    ) -> EngineResult<()> {
        self.verifier.verify(envelope, challenge)?;

        let assertion = self.credentials.check_signature(envelope, credential_id)?;

        if let Err(e) = self.mark(&envelope.nullifier_hash) {
            warn!(credential_id, proof_type = %envelope.proof_type, "replayed envelope rejected");
            return Err(e);
        }

        let scope = nullifier::credential_scope(credential_id, envelope.proof_type, &challenge.context());
        if let Err(e) = self.mark(&scope) {
            warn!(
                credential_id,
                proof_type = %envelope.proof_type,
                "credential already redeemed this challenge"
            );
            return Err(e);
        }

        self.credentials
            .advance_counter(credential_id, assertion.counter)?;

        info!(credential_id, proof_type = %envelope.proof_type, "envelope accepted");
        Ok(())
    }

    pub fn derive_nullifier(&self, secret_key: &Fr, proof_type: ProofType, challenge: &Challenge) -> Fr {
        nullifier::derive_nullifier(secret_key, proof_type, &challenge.context())
    }

    pub fn check_and_mark(&self, nullifier: &Fr) -> EngineResult<MarkOutcome> {
        Ok(self.nullifiers.check_and_mark(nullifier)?)
    }

    fn mark(&self, nullifier: &Fr) -> EngineResult<()> {
        if self.nullifiers.check_and_mark(nullifier)?.was_already_used {
            return Err(EngineError::ReplayDetected {
                nullifier: *nullifier,
            });
        }
        Ok(())
    }
}

/// Load keys from the configured directory, or run the seeded setup when it
/// holds none.
pub fn load_or_setup(config: &KeysConfig) -> KeyResult<KeyRing> {
    if config.dir.is_dir() {
        let ring = KeyRing::load_dir(&config.dir)?;
        if !ring.proof_types().is_empty() {
            return Ok(ring);
        }
    }

    warn!(dir = %config.dir.display(), "no circuit keys found; running seeded setup");
    let ring = KeyRing::setup(config.setup_seed)?;
    if config.persist {
        ring.save_dir(&config.dir)?;
    }
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::DeviceAuthenticator;
    use crate::error::{ErrorKind, Severity};
    use std::sync::OnceLock;

    fn keys() -> Arc<KeyRing> {
        static KEYS: OnceLock<Arc<KeyRing>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(KeyRing::setup_for(31, &[ProofType::CreditScore]).unwrap()))
            .clone()
    }

    fn challenge() -> Challenge {
        Challenge::new(ProofType::CreditScore, Fr::from(600u64), 9, 1_000, 100_000)
            .with_min_credit_score(600)
    }

    fn engine() -> ProofEngine {
        ProofEngine::new(keys(), NullifierRegistry::in_memory())
    }

    fn holder(sk: u64) -> AttributeWitness {
        AttributeWitness::new(Fr::from(sk)).with_credit_score(640).unwrap()
    }

    #[test]
    fn test_accept_then_replay() {
        let engine = engine();
        let device = DeviceAuthenticator::generate("device-a");
        engine.credentials().enroll_authenticator(&device).unwrap();

        let env = engine
            .generate_proof_at(ProofType::CreditScore, &holder(1), &challenge(), 2_000)
            .unwrap();
        let env = engine.sign_envelope(env, &device).unwrap();

        engine.accept(&env, &challenge(), "device-a").unwrap();

        let err = engine.accept(&env, &challenge(), "device-a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayDetected);
        assert_eq!(err.severity(), Severity::High);
        // the replay did not move the counter
        assert_eq!(engine.credentials().get("device-a").unwrap().counter, 1);
    }

    #[test]
    fn test_fresh_proof_same_holder_is_replay() {
        let engine = engine();
        let first = engine
            .generate_proof_at(ProofType::CreditScore, &holder(2), &challenge(), 2_000)
            .unwrap();
        let second = engine
            .generate_proof_at(ProofType::CreditScore, &holder(2), &challenge(), 3_000)
            .unwrap();
        assert_ne!(first.proof, second.proof);
        assert_eq!(first.nullifier_hash, second.nullifier_hash);
        assert_eq!(
            first.nullifier_hash,
            engine.derive_nullifier(&Fr::from(2u64), ProofType::CreditScore, &challenge())
        );

        engine.redeem(&first, &challenge()).unwrap();
        assert_eq!(
            engine.redeem(&second, &challenge()).unwrap_err().kind(),
            ErrorKind::ReplayDetected
        );
    }

    #[test]
    fn test_unsigned_envelope_rejected_without_consuming() {
        let engine = engine();
        let device = DeviceAuthenticator::generate("device-b");
        engine.credentials().enroll_authenticator(&device).unwrap();

        let env = engine
            .generate_proof_at(ProofType::CreditScore, &holder(3), &challenge(), 2_000)
            .unwrap();
        let err = engine.accept(&env, &challenge(), "device-b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialBinding);
        assert!(!engine.nullifiers().is_consumed(&env.nullifier_hash).unwrap());
    }

    #[test]
    fn test_one_device_two_secrets_same_challenge() {
        let engine = engine();
        let device = DeviceAuthenticator::generate("device-c");
        engine.credentials().enroll_authenticator(&device).unwrap();

        let first = engine
            .generate_proof_at(ProofType::CreditScore, &holder(101), &challenge(), 2_000)
            .unwrap();
        let second = engine
            .generate_proof_at(ProofType::CreditScore, &holder(102), &challenge(), 2_000)
            .unwrap();
        assert_ne!(first.nullifier_hash, second.nullifier_hash);

        let first = engine.sign_envelope(first, &device).unwrap();
        let second = engine.sign_envelope(second, &device).unwrap();
        engine.accept(&first, &challenge(), "device-c").unwrap();

        let err = engine.accept(&second, &challenge(), "device-c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayDetected);
        assert_eq!(engine.credentials().get("device-c").unwrap().counter, 1);
    }

    #[test]
    fn test_concurrent_accept_of_one_envelope() {
        let engine = engine();
        let device = DeviceAuthenticator::generate("device-d");
        engine.credentials().enroll_authenticator(&device).unwrap();
        let env = engine
            .generate_proof_at(ProofType::CreditScore, &holder(4), &challenge(), 2_000)
            .unwrap();
        let env = engine.sign_envelope(env, &device).unwrap();

        let results: Vec<EngineResult<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| engine.accept(&env, &challenge(), "device-d")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let replays = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .filter(|e| e.kind() == ErrorKind::ReplayDetected)
            .count();
        assert_eq!(replays, 7);
        assert_eq!(engine.credentials().get("device-d").unwrap().counter, 1);
    }

    #[test]
    fn test_from_config_with_sled_registry() {
        let dir = tempfile::tempdir().unwrap();
        let keys_dir = dir.path().join("keys");
        keys().save_dir(&keys_dir).unwrap();

        let config = EngineConfig {
            keys: KeysConfig {
                dir: keys_dir,
                setup_seed: 0,
                persist: false,
            },
            registry: crate::config::RegistryConfig {
                backend: RegistryBackend::Sled,
                path: dir.path().join("nullifiers"),
            },
            ..EngineConfig::default()
        };
        let path = dir.path().join("engine.toml");
        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let engine = ProofEngine::from_config(&loaded).unwrap();
        assert!(engine.keys().proof_types().contains(&ProofType::CreditScore));
        let env = engine
            .generate_proof_at(ProofType::CreditScore, &holder(5), &challenge(), 2_000)
            .unwrap();
        engine.redeem(&env, &challenge()).unwrap();
        assert_eq!(
            engine.redeem(&env, &challenge()).unwrap_err().kind(),
            ErrorKind::ReplayDetected
        );
        assert!(dir.path().join("nullifiers").exists());
    }

    #[test]
    fn test_load_or_setup_prefers_saved_keys() {
        let dir = tempfile::tempdir().unwrap();
        keys().save_dir(dir.path()).unwrap();
        let config = KeysConfig {
            dir: dir.path().to_path_buf(),
            setup_seed: 0,
            persist: false,
        };
        let ring = load_or_setup(&config).unwrap();
        assert_eq!(ring.proof_types(), vec![ProofType::CreditScore]);
    }
}
