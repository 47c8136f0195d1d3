use crate::error::{cancellable, BackendError, Phase, Result};
use crate::store::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Workspace that always exists, with or without a stored record.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Lists and deletes the workspaces of one namespace.
pub struct WorkspaceCatalog<S: StateStore> {
    store: Arc<S>,
    namespace: String,
}

impl<S: StateStore> Clone for WorkspaceCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
        }
    }
}

impl<S: StateStore> WorkspaceCatalog<S> {
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self { store, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// All workspace names: the default first, then every stored record in
    /// ascending order.
    #[instrument(skip(self, cancel), fields(namespace = %self.namespace))]
    pub async fn list_workspaces(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let target = format!("{}/*", self.namespace);
        let names = cancellable(cancel, &target, Phase::List, async {
            self.store
                .list_names(&self.namespace)
                .await
                .map_err(|source| self.query_error(Phase::List, source))
        })
        .await?;

        let mut result = Vec::with_capacity(names.len() + 1);
        result.push(DEFAULT_WORKSPACE.to_string());
        result.extend(names.into_iter().filter(|name| name != DEFAULT_WORKSPACE));

        debug!(count = result.len(), "listed workspaces");
        Ok(result)
    }

    /// Whether `name` is currently a workspace.
    pub async fn contains(&self, name: &str, cancel: &CancellationToken) -> Result<bool> {
        let names = self.list_workspaces(cancel).await?;
        Ok(names.iter().any(|existing| existing == name))
    }

    /// Delete a workspace's state record. The default workspace can't be
    /// deleted; deleting a workspace that has no record is not an error.
    #[instrument(skip(self, cancel), fields(namespace = %self.namespace))]
    pub async fn delete_workspace(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if name.is_empty() {
            return Err(BackendError::Validation(
                "workspace name must not be empty".to_string(),
            ));
        }
        if name == DEFAULT_WORKSPACE {
            return Err(BackendError::Validation(
                "can't delete default state".to_string(),
            ));
        }

        cancellable(cancel, name, Phase::Delete, async {
            self.store
                .delete(&self.namespace, name)
                .await
                .map_err(|source| self.query_error(Phase::Delete, source))
        })
        .await?;

        info!(workspace = name, "deleted workspace");
        Ok(())
    }

    fn query_error(&self, phase: Phase, source: crate::error::StoreError) -> BackendError {
        BackendError::Query {
            namespace: self.namespace.clone(),
            phase,
            source,
        }
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidNamespace(namespace.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn namespace_must_be_identifier() {
        let store = Arc::new(MemoryStore::new());
        assert!(WorkspaceCatalog::new(Arc::clone(&store), "public").is_ok());
        assert!(WorkspaceCatalog::new(Arc::clone(&store), "team_a-1").is_ok());
        for bad in ["", "has space", "semi;colon", "dot.ted"] {
            let err = WorkspaceCatalog::new(Arc::clone(&store), bad).err().unwrap();
            assert!(matches!(err, BackendError::InvalidNamespace(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn stored_default_row_is_not_listed_twice() {
        let store = Arc::new(MemoryStore::new());
        store.put("public", DEFAULT_WORKSPACE, b"{}").await.unwrap();
        store.put("public", "b", b"{}").await.unwrap();

        let catalog = WorkspaceCatalog::new(store, "public").unwrap();
        let names = catalog
            .list_workspaces(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(names, vec!["default", "b"]);
    }

    #[tokio::test]
    async fn default_is_always_contained() {
        let catalog = WorkspaceCatalog::new(Arc::new(MemoryStore::new()), "public").unwrap();
        let cancel = CancellationToken::new();
        assert!(catalog.contains("default", &cancel).await.unwrap());
        assert!(!catalog.contains("dev", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_listing_reports_cancellation() {
        let catalog = WorkspaceCatalog::new(Arc::new(MemoryStore::new()), "public").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = catalog.list_workspaces(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.phase(), Some(Phase::List));
    }
}
