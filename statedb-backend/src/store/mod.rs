//! Backing stores for workspace state records.
//!
//! A [`StateStore`] holds one record per `(namespace, name)` pair plus the
//! lock primitive guarding it. The catalog and the state managers only talk
//! to this trait; [`SqliteStore`] and [`MemoryStore`] are the provided
//! implementations.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::lock::LockInfo;
use async_trait::async_trait;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Names of all records in `namespace` except the reserved default,
    /// ascending.
    async fn list_names(&self, namespace: &str) -> StoreResult<Vec<String>>;

    /// Remove a record. Removing a missing record succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()>;

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Create or replace a record.
    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StoreResult<()>;

    /// Take the exclusive lock on a record, failing immediately with
    /// [`crate::StoreError::Locked`] if another holder has it. Returns the
    /// lock ID, which is `info.id`.
    async fn lock(&self, namespace: &str, name: &str, info: &LockInfo) -> StoreResult<String>;

    /// Release a lock previously returned by [`StateStore::lock`].
    async fn unlock(&self, namespace: &str, name: &str, id: &str) -> StoreResult<()>;
}
