//! State documents and per-workspace state managers.

use crate::error::{StoreError, StoreResult};
use crate::lock::LockInfo;
use crate::store::StateStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Current on-disk format version of [`StateDocument`].
pub const STATE_FORMAT_VERSION: u32 = 4;

/// The serialized state of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl StateDocument {
    /// A document with no outputs and no resources. Lineage is assigned on
    /// first persist.
    pub fn empty() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: String::new(),
            outputs: BTreeMap::new(),
            resources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.resources.is_empty()
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Content equality, ignoring serial and lineage bookkeeping.
    fn same_content(&self, other: &Self) -> bool {
        self.version == other.version
            && self.outputs == other.outputs
            && self.resources == other.resources
    }
}

/// Per-workspace handle over a state record.
///
/// This is the surface the bootstrap protocol drives: lock, inspect the
/// in-memory snapshot, write it, persist it, unlock. Handles are cheap to
/// clone and clones share one snapshot.
#[async_trait]
pub trait StateManager: Clone + Send + Sync + 'static {
    /// Workspace this manager is bound to.
    fn workspace(&self) -> &str;

    /// Acquire the workspace lock, returning the lock ID to unlock with.
    async fn lock(&self, info: &LockInfo) -> StoreResult<String>;

    async fn unlock(&self, id: &str) -> StoreResult<()>;

    /// In-memory snapshot, `None` until written or refreshed from a stored
    /// record.
    fn state(&self) -> Option<StateDocument>;

    /// Replace the in-memory snapshot. Does not touch the store.
    fn write_state(&self, state: StateDocument) -> StoreResult<()>;

    /// Load the snapshot from the store.
    async fn refresh_state(&self) -> StoreResult<()>;

    /// Write the in-memory snapshot to the store.
    async fn persist_state(&self) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct Snapshot {
    state: Option<StateDocument>,
    /// Last document read from or written to the store.
    persisted: Option<StateDocument>,
}

/// [`StateManager`] over any [`StateStore`].
pub struct RemoteState<S: StateStore> {
    store: Arc<S>,
    namespace: String,
    name: String,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl<S: StateStore> Clone for RemoteState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

impl<S: StateStore> std::fmt::Debug for RemoteState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteState")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore> RemoteState<S> {
    pub fn new(store: Arc<S>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            name: name.into(),
            snapshot: Arc::new(Mutex::new(Snapshot::default())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        // A poisoned snapshot is still a consistent value: every update
        // replaces whole fields.
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<S: StateStore + 'static> StateManager for RemoteState<S> {
    fn workspace(&self) -> &str {
        &self.name
    }

    async fn lock(&self, info: &LockInfo) -> StoreResult<String> {
        self.store.lock(&self.namespace, &self.name, info).await
    }

    async fn unlock(&self, id: &str) -> StoreResult<()> {
        self.store.unlock(&self.namespace, &self.name, id).await
    }

    fn state(&self) -> Option<StateDocument> {
        self.snapshot().state.clone()
    }

    fn write_state(&self, state: StateDocument) -> StoreResult<()> {
        let mut snapshot = self.snapshot();
        if let Some(persisted) = &snapshot.persisted {
            if !state.lineage.is_empty()
                && !persisted.lineage.is_empty()
                && state.lineage != persisted.lineage
            {
                return Err(StoreError::LineageMismatch {
                    stored: persisted.lineage.clone(),
                    found: state.lineage,
                });
            }
        }
        snapshot.state = Some(state);
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, workspace = %self.name))]
    async fn refresh_state(&self) -> StoreResult<()> {
        let state = match self.store.get(&self.namespace, &self.name).await? {
            Some(data) => Some(StateDocument::decode(&data)?),
            None => None,
        };
        debug!(found = state.is_some(), "refreshed state");

        let mut snapshot = self.snapshot();
        snapshot.persisted = state.clone();
        snapshot.state = state;
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, workspace = %self.name))]
    async fn persist_state(&self) -> StoreResult<()> {
        let (document, data) = {
            let snapshot = self.snapshot();
            let Some(mut document) = snapshot.state.clone() else {
                return Ok(());
            };

            match &snapshot.persisted {
                Some(persisted) => {
                    if document.lineage.is_empty() {
                        document.lineage = persisted.lineage.clone();
                    }
                    let changed = !document.same_content(persisted);
                    if !changed
                        && !document.lineage.is_empty()
                        && document.lineage == persisted.lineage
                    {
                        debug!("state unchanged, skipping persist");
                        return Ok(());
                    }
                    if document.lineage.is_empty() {
                        document.lineage = Uuid::new_v4().to_string();
                    }
                    if changed {
                        document.serial = persisted.serial.max(document.serial) + 1;
                    }
                }
                None => {
                    if document.lineage.is_empty() {
                        document.lineage = Uuid::new_v4().to_string();
                        document.serial = 0;
                    }
                }
            }

            let data = document.encode()?;
            (document, data)
        };

        self.store.put(&self.namespace, &self.name, &data).await?;
        debug!(serial = document.serial, lineage = %document.lineage, "persisted state");

        let mut snapshot = self.snapshot();
        snapshot.state = Some(document.clone());
        snapshot.persisted = Some(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::{CountingStore, StoreCall};

    type Store = CountingStore<MemoryStore>;

    fn new_store() -> Arc<Store> {
        Arc::new(CountingStore::new(MemoryStore::new()))
    }

    fn manager(store: &Arc<Store>, name: &str) -> RemoteState<Store> {
        RemoteState::new(Arc::clone(store), "public", name)
    }

    #[tokio::test]
    async fn state_is_absent_until_written() {
        let store = new_store();
        let mgr = manager(&store, "dev");
        assert!(mgr.state().is_none());

        mgr.refresh_state().await.unwrap();
        assert!(mgr.state().is_none());

        mgr.write_state(StateDocument::empty()).unwrap();
        assert_eq!(mgr.state(), Some(StateDocument::empty()));
        assert!(store.get("public", "dev").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_persist_assigns_lineage() {
        let store = new_store();
        let mgr = manager(&store, "dev");
        mgr.write_state(StateDocument::empty()).unwrap();
        mgr.persist_state().await.unwrap();

        let state = mgr.state().unwrap();
        assert!(Uuid::parse_str(&state.lineage).is_ok());
        assert_eq!(state.serial, 0);

        let other = manager(&store, "dev");
        other.refresh_state().await.unwrap();
        assert_eq!(other.state(), Some(state));
    }

    #[tokio::test]
    async fn persist_bumps_serial_only_on_change() {
        let store = new_store();
        let mgr = manager(&store, "dev");
        mgr.write_state(StateDocument::empty()).unwrap();
        mgr.persist_state().await.unwrap();
        mgr.persist_state().await.unwrap();
        assert_eq!(store.count(StoreCall::Put), 1);
        assert_eq!(mgr.state().unwrap().serial, 0);

        let mut changed = mgr.state().unwrap();
        changed
            .outputs
            .insert("endpoint".to_string(), serde_json::json!("10.0.0.1"));
        mgr.write_state(changed).unwrap();
        mgr.persist_state().await.unwrap();

        assert_eq!(store.count(StoreCall::Put), 2);
        assert_eq!(mgr.state().unwrap().serial, 1);
    }

    #[tokio::test]
    async fn write_rejects_foreign_lineage() {
        let store = new_store();
        let mgr = manager(&store, "dev");
        mgr.write_state(StateDocument::empty()).unwrap();
        mgr.persist_state().await.unwrap();

        let mut foreign = StateDocument::empty();
        foreign.lineage = Uuid::new_v4().to_string();
        let err = mgr.write_state(foreign).unwrap_err();
        assert!(matches!(err, StoreError::LineageMismatch { .. }));
    }

    #[tokio::test]
    async fn persisting_nothing_is_a_no_op() {
        let store = new_store();
        let mgr = manager(&store, "dev");
        mgr.persist_state().await.unwrap();
        assert_eq!(store.count(StoreCall::Put), 0);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = StateDocument::decode(b"not json").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn empty_document_is_empty() {
        let doc = StateDocument::empty();
        assert!(doc.is_empty());
        assert_eq!(doc.version, STATE_FORMAT_VERSION);
        let decoded = StateDocument::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }
}
