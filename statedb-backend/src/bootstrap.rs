//! First-use initialization of workspaces.
//!
//! Asking the [`Backend`] for a workspace's state manager checks the catalog
//! and, when the workspace has no record yet, writes an empty state document
//! under the workspace lock so the workspace shows up in listings from then
//! on:
//!
//! ```text
//! CheckExistence ──exists──────────────────────────────────────────▶ Bound
//!       │
//!       └─missing─▶ Locking ─▶ Initializing ─▶ Persisting ─▶ Unlocking ─▶ Bound
//! ```
//!
//! The existence check and the lock are not atomic: two processes can both
//! see a workspace as missing and both go on to lock it. The second one to
//! get the lock reloads the record under the lock, finds the first one's
//! document and leaves it alone.

use crate::catalog::WorkspaceCatalog;
use crate::error::{cancellable, BackendError, Phase, Result};
use crate::lock::{LockGuard, LockInfo, INIT_OPERATION};
use crate::state::{RemoteState, StateDocument, StateManager};
use crate::store::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Workspaces of one namespace in one store.
pub struct Backend<S: StateStore> {
    catalog: WorkspaceCatalog<S>,
}

impl<S: StateStore> Clone for Backend<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
        }
    }
}

impl<S: StateStore + 'static> Backend<S> {
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Result<Self> {
        Ok(Self {
            catalog: WorkspaceCatalog::new(store, namespace)?,
        })
    }

    pub fn catalog(&self) -> &WorkspaceCatalog<S> {
        &self.catalog
    }

    pub fn namespace(&self) -> &str {
        self.catalog.namespace()
    }

    pub async fn workspaces(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.catalog.list_workspaces(cancel).await
    }

    pub async fn delete_workspace(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.catalog.delete_workspace(name, cancel).await
    }

    /// State manager bound to `name`, creating the workspace's record if it
    /// does not exist yet.
    #[instrument(skip(self, cancel), fields(namespace = %self.namespace()))]
    pub async fn state_mgr(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteState<S>> {
        if name.is_empty() {
            return Err(BackendError::Validation(
                "workspace name must not be empty".to_string(),
            ));
        }

        let manager = RemoteState::new(
            Arc::clone(self.catalog.store()),
            self.namespace(),
            name,
        );

        if self.catalog.contains(name, cancel).await? {
            debug!(workspace = name, "workspace exists");
            return Ok(manager);
        }

        initialize(&manager, cancel).await?;
        Ok(manager)
    }
}

/// Write an empty state document for `manager`'s workspace under its lock.
///
/// The lock is released exactly once whatever happens after it is acquired.
/// When the release itself fails after an earlier failure, both are reported
/// through [`BackendError::UnlockAfterFailure`].
#[instrument(skip_all, fields(workspace = %manager.workspace()))]
pub async fn initialize<M: StateManager>(manager: &M, cancel: &CancellationToken) -> Result<()> {
    let workspace = manager.workspace().to_string();
    let info = LockInfo::new(INIT_OPERATION).with_path(workspace.clone());

    let guard = LockGuard::acquire(manager, info, cancel).await?;
    let outcome = write_empty_state(manager, &workspace, cancel).await;

    match (outcome, guard.release().await) {
        (Ok(created), Ok(())) => {
            if created {
                info!("initialized empty state");
            }
            Ok(())
        }
        (Err(e), Ok(())) => Err(e),
        (outcome, Err(unlock)) => Err(BackendError::with_unlock_failure(
            &workspace,
            outcome.err(),
            unlock,
        )),
    }
}

/// Returns whether a document was written; `false` when another caller got
/// there first.
async fn write_empty_state<M: StateManager>(
    manager: &M,
    workspace: &str,
    cancel: &CancellationToken,
) -> Result<bool> {
    let initialization_error = |source| BackendError::Initialization {
        workspace: workspace.to_string(),
        source,
    };

    if manager.state().is_none() {
        cancellable(cancel, workspace, Phase::Initialize, async {
            manager.refresh_state().await.map_err(initialization_error)
        })
        .await?;
    }
    if manager.state().is_some() {
        debug!("state already present under lock, leaving it as is");
        return Ok(false);
    }

    manager
        .write_state(StateDocument::empty())
        .map_err(initialization_error)?;

    cancellable(cancel, workspace, Phase::Persist, async {
        manager
            .persist_state()
            .await
            .map_err(|source| BackendError::Persistence {
                workspace: workspace.to_string(),
                source,
            })
    })
    .await?;

    Ok(true)
}
