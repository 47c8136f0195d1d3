//! State locks.
//!
//! [`LockInfo`] describes a lease on one workspace's state record and is what
//! the store keeps while the lock is held. [`LockGuard`] owns an acquired
//! lease: [`LockGuard::release`] performs the single unlock, and a guard that
//! is dropped before release (the owning future was dropped) schedules the
//! unlock on the current Tokio runtime instead of leaking the lock.

use crate::error::{BackendError, Phase, Result, StoreError, StoreResult};
use crate::state::StateManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// How long a lock request interrupted by cancellation may still complete.
const LOCK_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Operation label used when a workspace is created on first use.
pub const INIT_OPERATION: &str = "init";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Generated before the lock is requested so an abandoned request can
    /// still be released by ID.
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub info: String,
    pub who: String,
    pub version: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub path: String,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            info: String::new(),
            who: current_who(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            path: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}

fn current_who() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{user}@{host}")
}

/// An acquired state lock that must be released exactly once.
pub struct LockGuard<M: StateManager> {
    manager: M,
    id: String,
    released: bool,
}

impl<M: StateManager> LockGuard<M> {
    /// Acquire the lock described by `info` on `manager`'s workspace.
    ///
    /// The guard is armed with the client-side lock ID before the request is
    /// sent. A cancellation that lands mid-request releases that ID before
    /// `Cancelled` is returned; a dropped request leaves it to [`Drop`].
    pub async fn acquire(
        manager: &M,
        info: LockInfo,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let workspace = manager.workspace().to_string();
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled {
                workspace,
                phase: Phase::Lock,
            });
        }

        let mut guard = Self {
            manager: manager.clone(),
            id: info.id.clone(),
            released: false,
        };

        let mut request = manager.lock(&info);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            result = &mut request => {
                return match result {
                    Ok(id) => {
                        debug!(workspace = %workspace, lock_id = %id, operation = %info.operation, "acquired state lock");
                        guard.id = id;
                        Ok(guard)
                    }
                    Err(source) => {
                        // Nothing was obtained, so there is nothing to release.
                        guard.released = true;
                        Err(BackendError::Lock { workspace, source })
                    }
                };
            }
        }

        // The store may commit a request its caller stopped waiting for.
        // Let it settle briefly, then release before reporting cancellation.
        match tokio::time::timeout(LOCK_SETTLE_TIMEOUT, &mut request).await {
            Ok(Ok(id)) => guard.id = id,
            Ok(Err(_)) => guard.released = true,
            Err(_) => debug!(workspace = %workspace, lock_id = %guard.id, "lock request still pending after cancellation"),
        }
        drop(request);

        let cancelled = BackendError::Cancelled {
            workspace: workspace.clone(),
            phase: Phase::Lock,
        };
        if guard.released {
            return Err(cancelled);
        }
        match guard.release().await {
            Ok(()) | Err(StoreError::LockMismatch { .. }) => Err(cancelled),
            Err(unlock) => Err(BackendError::with_unlock_failure(
                &workspace,
                Some(cancelled),
                unlock,
            )),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Release the lock. Not raced against any cancellation signal.
    pub async fn release(mut self) -> StoreResult<()> {
        let result = self.manager.unlock(&self.id).await;
        // Only mark released once the unlock call has completed; if this
        // future is dropped mid-call, Drop retries in the background.
        self.released = true;
        match &result {
            Ok(()) => debug!(workspace = %self.manager.workspace(), lock_id = %self.id, "released state lock"),
            Err(e) => warn!(workspace = %self.manager.workspace(), lock_id = %self.id, error = %e, "failed to release state lock"),
        }
        result
    }
}

impl<M: StateManager> Drop for LockGuard<M> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    workspace = %self.manager.workspace(),
                    lock_id = %id,
                    "state lock dropped before release, unlocking in background"
                );
                let manager = self.manager.clone();
                handle.spawn(async move {
                    if let Err(e) = manager.unlock(&id).await {
                        warn!(
                            workspace = %manager.workspace(),
                            lock_id = %id,
                            error = %e,
                            "background unlock failed"
                        );
                    }
                });
            }
            Err(_) => {
                error!(
                    workspace = %self.manager.workspace(),
                    lock_id = %id,
                    "state lock dropped outside a Tokio runtime and was not released"
                );
            }
        }
    }
}
