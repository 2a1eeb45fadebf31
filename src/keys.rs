//! Groth16 key material, one pair per proof type.
//!
//! Keys come from a seeded circuit-specific setup or from a directory
//! written by [`KeyRing::save_dir`]. A process installs its ring once with
//! [`install`]; nothing regenerates keys after that.

use ark_bn254::Bn254;
use ark_groth16::{Groth16, PreparedVerifyingKey, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info};

use crate::circuit::{IdentityCircuit, ALLOW_LIST_DEPTH};
use crate::types::ProofType;

const MAGIC: &[u8; 4] = b"ZKID";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 6;

static GLOBAL: OnceLock<Arc<KeyRing>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("trusted setup failed: {0}")]
    SetupFailed(String),

    #[error("key serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no keys loaded for {0} proofs")]
    Missing(ProofType),

    #[error("no proving key loaded for {0} proofs")]
    MissingProvingKey(ProofType),

    #[error("a key ring is already installed")]
    AlreadyInstalled,
}

pub type KeyResult<T> = Result<T, KeyError>;

/// Keys for one circuit shape. Verifier-only deployments carry no
/// proving key.
#[derive(Clone)]
pub struct CircuitKeys {
    proving_key: Option<ProvingKey<Bn254>>,
    verifying_key: VerifyingKey<Bn254>,
    prepared: PreparedVerifyingKey<Bn254>,
}

impl CircuitKeys {
    fn from_proving_key(pk: ProvingKey<Bn254>) -> KeyResult<Self> {
        let mut keys = Self::from_verifying_key(pk.vk.clone())?;
        keys.proving_key = Some(pk);
        Ok(keys)
    }

    fn from_verifying_key(vk: VerifyingKey<Bn254>) -> KeyResult<Self> {
        let prepared = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|e| KeyError::SetupFailed(e.to_string()))?;
        Ok(Self {
            proving_key: None,
            verifying_key: vk,
            prepared,
        })
    }

    pub fn proving_key(&self) -> Option<&ProvingKey<Bn254>> {
        self.proving_key.as_ref()
    }

    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.verifying_key
    }

    pub fn prepared(&self) -> &PreparedVerifyingKey<Bn254> {
        &self.prepared
    }
}

#[derive(Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<u8, CircuitKeys>,
}

impl KeyRing {
    /// Deterministic setup for every proof type.
    ///
    /// The seed makes the toxic waste reproducible; use it for development
    /// and tests, and load ceremony output in production.
    pub fn setup(seed: u64) -> KeyResult<Self> {
        Self::setup_for(seed, &ProofType::ALL)
    }

    pub fn setup_for(seed: u64, proof_types: &[ProofType]) -> KeyResult<Self> {
        let mut ring = Self::default();
        for &proof_type in proof_types {
            let started = Instant::now();
            let circuit = IdentityCircuit::blank(proof_type, ALLOW_LIST_DEPTH);
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(proof_type.code() as u64));

            let (pk, _vk) = Groth16::<Bn254>::circuit_specific_setup(circuit, &mut rng)
                .map_err(|e| KeyError::SetupFailed(format!("{proof_type}: {e}")))?;

            info!(
                proof_type = %proof_type,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "circuit keys generated"
            );
            ring.keys
                .insert(proof_type.code(), CircuitKeys::from_proving_key(pk)?);
        }
        Ok(ring)
    }

    pub fn get(&self, proof_type: ProofType) -> KeyResult<&CircuitKeys> {
        self.keys
            .get(&proof_type.code())
            .ok_or(KeyError::Missing(proof_type))
    }

    pub fn proving_key(&self, proof_type: ProofType) -> KeyResult<&ProvingKey<Bn254>> {
        self.get(proof_type)?
            .proving_key()
            .ok_or(KeyError::MissingProvingKey(proof_type))
    }

    pub fn contains(&self, proof_type: ProofType) -> bool {
        self.keys.contains_key(&proof_type.code())
    }

    pub fn proof_types(&self) -> Vec<ProofType> {
        self.keys.keys().filter_map(|c| ProofType::from_code(*c)).collect()
    }

    /// Copy of this ring without proving keys.
    pub fn verifier_only(&self) -> Self {
        let keys = self
            .keys
            .iter()
            .map(|(code, k)| {
                let mut k = k.clone();
                k.proving_key = None;
                (*code, k)
            })
            .collect();
        Self { keys }
    }

    /// Write `<name>.pk` (when present) and `<name>.vk` per proof type.
    pub fn save_dir(&self, dir: &Path) -> KeyResult<()> {
        std::fs::create_dir_all(dir)?;
        for (code, keys) in &self.keys {
            let Some(proof_type) = ProofType::from_code(*code) else {
                continue;
            };
            if let Some(pk) = &keys.proving_key {
                write_key(&dir.join(format!("{}.pk", proof_type.name())), proof_type, pk)?;
            }
            write_key(
                &dir.join(format!("{}.vk", proof_type.name())),
                proof_type,
                &keys.verifying_key,
            )?;
        }
        debug!(dir = %dir.display(), "key ring saved");
        Ok(())
    }

    /// Load whatever keys `dir` holds. A proving key implies its verifying
    /// key; a lone `.vk` gives a verifier-only entry.
    pub fn load_dir(dir: &Path) -> KeyResult<Self> {
        let mut ring = Self::default();
        for proof_type in ProofType::ALL {
            let pk_path = dir.join(format!("{}.pk", proof_type.name()));
            let vk_path = dir.join(format!("{}.vk", proof_type.name()));

            let keys = if pk_path.exists() {
                CircuitKeys::from_proving_key(read_key(&pk_path, proof_type)?)?
            } else if vk_path.exists() {
                CircuitKeys::from_verifying_key(read_key(&vk_path, proof_type)?)?
            } else {
                continue;
            };
            ring.keys.insert(proof_type.code(), keys);
        }
        info!(dir = %dir.display(), loaded = ring.keys.len(), "key ring loaded");
        Ok(ring)
    }
}

fn write_key<T: CanonicalSerialize>(path: &Path, proof_type: ProofType, key: &T) -> KeyResult<()> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + key.compressed_size());
    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.push(proof_type.code());
    key.serialize_compressed(&mut bytes)
        .map_err(|e| KeyError::Serialization(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_key<T: CanonicalDeserialize>(path: &Path, proof_type: ProofType) -> KeyResult<T> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(KeyError::Serialization(format!(
            "{} is not a key file",
            path.display()
        )));
    }
    if bytes[4] != FORMAT_VERSION || bytes[5] != proof_type.code() {
        return Err(KeyError::Serialization(format!(
            "{} has version {} for proof type {}, expected version {FORMAT_VERSION} for {}",
            path.display(),
            bytes[4],
            bytes[5],
            proof_type.code()
        )));
    }
    T::deserialize_compressed(&bytes[HEADER_LEN..]).map_err(|e| KeyError::Serialization(e.to_string()))
}

/// Install the process-wide key ring. Fails if one is already installed.
pub fn install(ring: KeyRing) -> KeyResult<Arc<KeyRing>> {
    GLOBAL
        .set(Arc::new(ring))
        .map_err(|_| KeyError::AlreadyInstalled)?;
    GLOBAL.get().cloned().ok_or(KeyError::AlreadyInstalled)
}

/// The installed ring, building and installing one with `init` first if
/// none is.
pub fn install_or_get(init: impl FnOnce() -> KeyResult<KeyRing>) -> KeyResult<Arc<KeyRing>> {
    if let Some(ring) = GLOBAL.get() {
        return Ok(ring.clone());
    }
    let ring = Arc::new(init()?);
    Ok(GLOBAL.get_or_init(|| ring).clone())
}

pub fn global() -> Option<Arc<KeyRing>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_deterministic() {
        let a = KeyRing::setup_for(7, &[ProofType::CreditScore]).unwrap();
        let b = KeyRing::setup_for(7, &[ProofType::CreditScore]).unwrap();
        assert_eq!(
            a.get(ProofType::CreditScore).unwrap().verifying_key(),
            b.get(ProofType::CreditScore).unwrap().verifying_key()
        );
        assert_eq!(
            a.get(ProofType::CreditScore).unwrap().verifying_key().gamma_abc_g1.len(),
            ProofType::CreditScore.signal_count() + 1
        );
        assert!(matches!(a.get(ProofType::Age), Err(KeyError::Missing(ProofType::Age))));
    }

    #[test]
    fn test_save_and_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ring = KeyRing::setup_for(3, &[ProofType::CreditScore]).unwrap();
        ring.save_dir(dir.path()).unwrap();

        let loaded = KeyRing::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.proof_types(), vec![ProofType::CreditScore]);
        assert_eq!(
            loaded.get(ProofType::CreditScore).unwrap().verifying_key(),
            ring.get(ProofType::CreditScore).unwrap().verifying_key()
        );
        assert!(loaded.proving_key(ProofType::CreditScore).is_ok());
    }

    #[test]
    fn test_verifier_only_ring() {
        let dir = tempfile::tempdir().unwrap();
        let ring = KeyRing::setup_for(3, &[ProofType::CreditScore])
            .unwrap()
            .verifier_only();
        ring.save_dir(dir.path()).unwrap();
        assert!(!dir.path().join("credit-score.pk").exists());

        let loaded = KeyRing::load_dir(dir.path()).unwrap();
        assert!(matches!(
            loaded.proving_key(ProofType::CreditScore),
            Err(KeyError::MissingProvingKey(ProofType::CreditScore))
        ));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("age.vk"), b"not a key").unwrap();
        assert!(matches!(
            KeyRing::load_dir(dir.path()),
            Err(KeyError::Serialization(_))
        ));
    }
}
