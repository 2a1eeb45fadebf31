//! Nullifier derivation and the replay registry.
//!
//! A nullifier is `Poseidon(NULLIFIER, secret_key, proof_type, context)`.
//! It is deterministic for one holder, proof type and challenge context,
//! and unlinkable across contexts. The registry records every nullifier it
//! accepts; records are never removed.

mod memory;
mod sled_store;

pub use memory::MemoryNullifierStore;
pub use sled_store::SledNullifierStore;

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::field::{digest_to_field, field_to_bytes, field_to_hex, FIELD_BYTES};
use crate::merkle::{domain, PoseidonHasher};
use crate::types::ProofType;

pub type NullifierKey = [u8; FIELD_BYTES];

pub fn derive_nullifier(secret_key: &Fr, proof_type: ProofType, context: &Fr) -> Fr {
    PoseidonHasher::new().hash_tagged(
        domain::NULLIFIER,
        &[*secret_key, Fr::from(proof_type.code() as u64), *context],
    )
}

/// `Poseidon(REDEMPTION, H(credential_id), proof_type, context)`: the slot a
/// single enrolled credential may fill once per challenge context,
/// whichever secret key its proofs were generated with.
pub fn credential_scope(credential_id: &str, proof_type: ProofType, context: &Fr) -> Fr {
    PoseidonHasher::new().hash_tagged(
        domain::REDEMPTION,
        &[
            digest_to_field(credential_id.as_bytes()),
            Fr::from(proof_type.code() as u64),
            *context,
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierRecord {
    /// Unix milliseconds at which the nullifier was first accepted.
    pub consumed_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOutcome {
    pub was_already_used: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("nullifier store error: {0}")]
    Storage(String),

    #[error("corrupt nullifier record: {0}")]
    Corrupt(String),
}

/// Backing storage for consumed nullifiers.
pub trait NullifierStore: Send + Sync {
    /// Atomically insert `record` unless `key` is present. Returns the
    /// existing record if there was one, `None` if this call inserted.
    fn insert_if_absent(
        &self,
        key: &NullifierKey,
        record: NullifierRecord,
    ) -> Result<Option<NullifierRecord>, RegistryError>;

    fn get(&self, key: &NullifierKey) -> Result<Option<NullifierRecord>, RegistryError>;

    fn len(&self) -> Result<usize, RegistryError>;

    fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}

/// Shared handle to a nullifier store. Clones share the same records.
#[derive(Clone)]
pub struct NullifierRegistry {
    store: Arc<dyn NullifierStore>,
}

impl NullifierRegistry {
    pub fn new(store: Arc<dyn NullifierStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryNullifierStore::new()))
    }

    pub fn check_and_mark(&self, nullifier: &Fr) -> Result<MarkOutcome, RegistryError> {
        self.check_and_mark_at(nullifier, now_ms())
    }

    /// Mark `nullifier` consumed at `at_ms`. Linearizable per nullifier:
    /// of any number of concurrent calls exactly one sees
    /// `was_already_used == false`.
    pub fn check_and_mark_at(&self, nullifier: &Fr, at_ms: u64) -> Result<MarkOutcome, RegistryError> {
        let key = field_to_bytes(nullifier);
        let previous = self.store.insert_if_absent(
            &key,
            NullifierRecord {
                consumed_at_ms: at_ms,
            },
        )?;

        match previous {
            Some(record) => {
                warn!(
                    nullifier = %field_to_hex(nullifier),
                    consumed_at_ms = record.consumed_at_ms,
                    "nullifier reuse rejected"
                );
                Ok(MarkOutcome {
                    was_already_used: true,
                })
            }
            None => {
                debug!(nullifier = %field_to_hex(nullifier), "nullifier consumed");
                Ok(MarkOutcome {
                    was_already_used: false,
                })
            }
        }
    }

    pub fn is_consumed(&self, nullifier: &Fr) -> Result<bool, RegistryError> {
        Ok(self.record(nullifier)?.is_some())
    }

    pub fn record(&self, nullifier: &Fr) -> Result<Option<NullifierRecord>, RegistryError> {
        self.store.get(&field_to_bytes(nullifier))
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        self.store.is_empty()
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_nullifier_is_deterministic_and_scoped() {
        let sk = Fr::from(31337u64);
        let ctx = Fr::from(1u64);
        let a = derive_nullifier(&sk, ProofType::Age, &ctx);
        assert_eq!(a, derive_nullifier(&sk, ProofType::Age, &ctx));
        assert_ne!(a, derive_nullifier(&sk, ProofType::Residency, &ctx));
        assert_ne!(a, derive_nullifier(&sk, ProofType::Age, &Fr::from(2u64)));
        assert_ne!(a, derive_nullifier(&Fr::from(31338u64), ProofType::Age, &ctx));
    }

    #[test]
    fn test_credential_scope_per_credential_type_and_context() {
        let ctx = Fr::from(1u64);
        let scope = credential_scope("phone-1", ProofType::Age, &ctx);
        assert_eq!(scope, credential_scope("phone-1", ProofType::Age, &ctx));
        assert_ne!(scope, credential_scope("phone-2", ProofType::Age, &ctx));
        assert_ne!(scope, credential_scope("phone-1", ProofType::Residency, &ctx));
        assert_ne!(scope, credential_scope("phone-1", ProofType::Age, &Fr::from(2u64)));
    }

    #[test]
    fn test_check_and_mark() {
        let registry = NullifierRegistry::in_memory();
        let n = Fr::from(99u64);
        assert!(!registry.is_consumed(&n).unwrap());
        assert!(!registry.check_and_mark_at(&n, 10).unwrap().was_already_used);
        assert!(registry.check_and_mark_at(&n, 20).unwrap().was_already_used);
        // first acceptance time is kept
        assert_eq!(registry.record(&n).unwrap().unwrap().consumed_at_ms, 10);
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_marks_admit_exactly_one() {
        let registry = NullifierRegistry::in_memory();
        let n = Fr::from(7u64);
        let fresh = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if !registry.check_and_mark(&n).unwrap().was_already_used {
                        fresh.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(fresh.load(Ordering::SeqCst), 1);
        assert!(registry.is_consumed(&n).unwrap());
    }

    #[test]
    fn test_distinct_nullifiers_do_not_collide() {
        let registry = NullifierRegistry::in_memory();
        std::thread::scope(|s| {
            for i in 0..8u64 {
                let registry = registry.clone();
                s.spawn(move || {
                    for j in 0..50u64 {
                        let n = Fr::from(i * 1000 + j);
                        assert!(!registry.check_and_mark(&n).unwrap().was_already_used);
                    }
                });
            }
        });
        assert_eq!(registry.len().unwrap(), 400);
    }
}
