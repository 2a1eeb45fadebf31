use sled::{Db, Tree};
use std::path::Path;
use tracing::info;

use super::{NullifierKey, NullifierRecord, NullifierStore, RegistryError};

const TREE_NAME: &str = "nullifiers";

/// On-disk store backed by a sled tree. Inserts use compare-and-swap so
/// concurrent writers, including other handles on the same database, agree
/// on a single first use.
pub struct SledNullifierStore {
    _db: Db,
    tree: Tree,
}

impl SledNullifierStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        info!("Opening nullifier store at {:?}", path);
        let db = sled::Config::new()
            .path(path)
            .open()
            .map_err(|e| RegistryError::Storage(format!("failed to open database: {e}")))?;
        Self::from_db(db)
    }

    pub fn temporary() -> Result<Self, RegistryError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| RegistryError::Storage(format!("failed to open temp database: {e}")))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, RegistryError> {
        let tree = db
            .open_tree(TREE_NAME)
            .map_err(|e| RegistryError::Storage(format!("failed to open {TREE_NAME} tree: {e}")))?;
        Ok(Self { _db: db, tree })
    }

    pub fn flush(&self) -> Result<(), RegistryError> {
        self.tree
            .flush()
            .map_err(|e| RegistryError::Storage(format!("flush failed: {e}")))?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<NullifierRecord, RegistryError> {
    bincode::deserialize(bytes).map_err(|e| RegistryError::Corrupt(e.to_string()))
}

impl NullifierStore for SledNullifierStore {
    fn insert_if_absent(
        &self,
        key: &NullifierKey,
        record: NullifierRecord,
    ) -> Result<Option<NullifierRecord>, RegistryError> {
        let value = bincode::serialize(&record)
            .map_err(|e| RegistryError::Storage(format!("failed to encode record: {e}")))?;

        let swapped = self
            .tree
            .compare_and_swap(key, None::<&[u8]>, Some(value))
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        match swapped {
            Ok(()) => Ok(None),
            Err(conflict) => match conflict.current {
                Some(current) => decode(&current).map(Some),
                None => Err(RegistryError::Storage(
                    "compare-and-swap conflict without a current value".into(),
                )),
            },
        }
    }

    fn get(&self, key: &NullifierKey) -> Result<Option<NullifierRecord>, RegistryError> {
        self.tree
            .get(key)
            .map_err(|e| RegistryError::Storage(e.to_string()))?
            .map(|v| decode(&v))
            .transpose()
    }

    fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.tree.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullifier::NullifierRegistry;
    use ark_bn254::Fr;
    use std::sync::Arc;

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let n = Fr::from(12345u64);
        {
            let store = Arc::new(SledNullifierStore::open(dir.path()).unwrap());
            let registry = NullifierRegistry::new(store.clone());
            assert!(!registry.check_and_mark_at(&n, 500).unwrap().was_already_used);
            store.flush().unwrap();
        }
        let store = SledNullifierStore::open(dir.path()).unwrap();
        let registry = NullifierRegistry::new(Arc::new(store));
        assert!(registry.is_consumed(&n).unwrap());
        assert!(registry.check_and_mark(&n).unwrap().was_already_used);
        assert_eq!(registry.record(&n).unwrap().unwrap().consumed_at_ms, 500);
    }

    #[test]
    fn test_temporary_store_concurrent_marks() {
        let registry = NullifierRegistry::new(Arc::new(SledNullifierStore::temporary().unwrap()));
        let n = Fr::from(8u64);
        let results: Vec<bool> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.check_and_mark(&n).unwrap().was_already_used))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|used| !**used).count(), 1);
    }
}
