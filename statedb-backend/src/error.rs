use crate::lock::LockInfo;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, BackendError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures raised by a [`crate::StateStore`] or a [`crate::StateManager`].
///
/// These carry no workspace or phase context; [`BackendError`] adds that.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state is locked by {} (lock ID {}, operation {:?}, since {})", .info.who, .info.id, .info.operation, .info.created)]
    Locked { info: Box<LockInfo> },

    #[error("lock ID {expected} does not match the current lock{}", held_suffix(.held))]
    LockMismatch {
        expected: String,
        held: Option<Box<LockInfo>>,
    },

    #[error("state lineage {found} does not match stored lineage {stored}")]
    LineageMismatch { stored: String, found: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

fn held_suffix(held: &Option<Box<LockInfo>>) -> String {
    match held {
        Some(info) => format!(" (held by {} with ID {})", info.who, info.id),
        None => " (state is not locked)".to_string(),
    }
}

/// Step of a catalog or bootstrap operation, used to label errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    List,
    Delete,
    Lock,
    Initialize,
    Persist,
    Unlock,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::List => "listing workspaces",
            Phase::Delete => "deleting workspace",
            Phase::Lock => "locking state",
            Phase::Initialize => "initializing state",
            Phase::Persist => "persisting state",
            Phase::Unlock => "unlocking state",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid namespace {0:?}: must be a non-empty identifier of letters, digits, '_' or '-'")]
    InvalidNamespace(String),

    #[error("failed {phase} in namespace {namespace:?}: {source}")]
    Query {
        namespace: String,
        phase: Phase,
        #[source]
        source: StoreError,
    },

    #[error("failed to lock state for workspace {workspace:?}: {source}")]
    Lock {
        workspace: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to initialize empty state for workspace {workspace:?}: {source}")]
    Initialization {
        workspace: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist initial state for workspace {workspace:?}: {source}")]
    Persistence {
        workspace: String,
        #[source]
        source: StoreError,
    },

    #[error("error unlocking state for workspace {workspace:?}: {source}")]
    Unlock {
        workspace: String,
        #[source]
        source: StoreError,
    },

    /// Release failed after an earlier step had already failed.
    ///
    /// The earlier failure is the error source; the release failure is kept
    /// alongside it so neither cause is lost.
    #[error("error unlocking state for workspace {workspace:?} ({unlock}) after: {cause}")]
    UnlockAfterFailure {
        workspace: String,
        unlock: StoreError,
        #[source]
        cause: Box<BackendError>,
    },

    #[error("{phase} for workspace {workspace:?} was cancelled")]
    Cancelled { workspace: String, phase: Phase },
}

impl BackendError {
    /// Phase the failure happened in, when the error is tied to one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackendError::Validation(_) | BackendError::InvalidNamespace(_) => None,
            BackendError::Query { phase, .. } | BackendError::Cancelled { phase, .. } => {
                Some(*phase)
            }
            BackendError::Lock { .. } => Some(Phase::Lock),
            BackendError::Initialization { .. } => Some(Phase::Initialize),
            BackendError::Persistence { .. } => Some(Phase::Persist),
            BackendError::Unlock { .. } | BackendError::UnlockAfterFailure { .. } => {
                Some(Phase::Unlock)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            BackendError::Cancelled { .. } => true,
            BackendError::UnlockAfterFailure { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }

    /// Combine a failed release with whatever result the locked section had.
    pub(crate) fn with_unlock_failure(
        workspace: &str,
        earlier: Option<BackendError>,
        unlock: StoreError,
    ) -> Self {
        match earlier {
            Some(cause) => BackendError::UnlockAfterFailure {
                workspace: workspace.to_string(),
                unlock,
                cause: Box::new(cause),
            },
            None => BackendError::Unlock {
                workspace: workspace.to_string(),
                source: unlock,
            },
        }
    }
}

/// Run one store call, giving up with [`BackendError::Cancelled`] if `cancel`
/// fires first. The abandoned call future is dropped.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    workspace: &str,
    phase: Phase,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackendError::Cancelled {
            workspace: workspace.to_string(),
            phase,
        }),
        result = call => result,
    }
}
