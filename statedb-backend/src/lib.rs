//! Workspace state storage
//!
//! This crate manages named workspaces, each backed by one serialized state
//! document in a shared store. It lists and deletes workspaces, and hands out
//! state managers, creating a workspace's record on first use under the
//! workspace lock so concurrent initializers never clobber each other.
//!
//! Stores are injected: use [`SqliteStore`] for a database shared between
//! processes, or [`MemoryStore`] for a process-local one.

pub mod bootstrap;
pub mod catalog;
pub mod db;
pub mod error;
pub mod lock;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bootstrap::{initialize, Backend};
pub use catalog::{WorkspaceCatalog, DEFAULT_WORKSPACE};
pub use error::{BackendError, Phase, Result, StoreError, StoreResult};
pub use lock::{LockGuard, LockInfo, INIT_OPERATION};
pub use state::{RemoteState, StateDocument, StateManager};
pub use store::{MemoryStore, SqliteStore, StateStore};
pub use tokio_util::sync::CancellationToken;
