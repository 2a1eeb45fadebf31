use parking_lot::Mutex;
use std::collections::HashMap;

use super::{NullifierKey, NullifierRecord, NullifierStore, RegistryError};

const SHARDS: usize = 16;

/// In-process store. Keys are spread over independently locked shards so
/// unrelated nullifiers rarely wait on each other.
pub struct MemoryNullifierStore {
    shards: Vec<Mutex<HashMap<NullifierKey, NullifierRecord>>>,
}

impl MemoryNullifierStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &NullifierKey) -> &Mutex<HashMap<NullifierKey, NullifierRecord>> {
        // Poseidon output: the low byte is uniform enough to pick a shard.
        &self.shards[key[key.len() - 1] as usize % SHARDS]
    }
}

impl Default for MemoryNullifierStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NullifierStore for MemoryNullifierStore {
    fn insert_if_absent(
        &self,
        key: &NullifierKey,
        record: NullifierRecord,
    ) -> Result<Option<NullifierRecord>, RegistryError> {
        let mut shard = self.shard(key).lock();
        match shard.get(key) {
            Some(existing) => Ok(Some(*existing)),
            None => {
                shard.insert(*key, record);
                Ok(None)
            }
        }
    }

    fn get(&self, key: &NullifierKey) -> Result<Option<NullifierRecord>, RegistryError> {
        Ok(self.shard(key).lock().get(key).copied())
    }

    fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.shards.iter().map(|s| s.lock().len()).sum())
    }
}
