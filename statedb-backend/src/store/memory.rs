use super::StateStore;
use crate::catalog::DEFAULT_WORKSPACE;
use crate::error::{StoreError, StoreResult};
use crate::lock::LockInfo;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Key = (String, String);

#[derive(Debug, Default)]
struct Tables {
    states: BTreeMap<Key, Vec<u8>>,
    locks: BTreeMap<Key, LockInfo>,
}

/// Process-local store with the same semantics as [`super::SqliteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of the lock on a record, if any.
    pub fn lock_holder(&self, namespace: &str, name: &str) -> Option<LockInfo> {
        self.tables().locks.get(&key(namespace, name)).cloned()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn list_names(&self, namespace: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables()
            .states
            .keys()
            .filter(|(ns, name)| ns == namespace && name != DEFAULT_WORKSPACE)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.tables().states.remove(&key(namespace, name));
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tables().states.get(&key(namespace, name)).cloned())
    }

    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StoreResult<()> {
        self.tables()
            .states
            .insert(key(namespace, name), data.to_vec());
        Ok(())
    }

    async fn lock(&self, namespace: &str, name: &str, info: &LockInfo) -> StoreResult<String> {
        let mut tables = self.tables();
        let entry = tables.locks.entry(key(namespace, name));
        match entry {
            std::collections::btree_map::Entry::Occupied(held) => Err(StoreError::Locked {
                info: Box::new(held.get().clone()),
            }),
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(info.clone());
                Ok(info.id.clone())
            }
        }
    }

    async fn unlock(&self, namespace: &str, name: &str, id: &str) -> StoreResult<()> {
        let mut tables = self.tables();
        let k = key(namespace, name);
        match tables.locks.get(&k) {
            Some(held) if held.id == id => {
                tables.locks.remove(&k);
                Ok(())
            }
            held => Err(StoreError::LockMismatch {
                expected: id.to_string(),
                held: held.cloned().map(Box::new),
            }),
        }
    }
}
