use statedb_backend::{Backend, BackendError, CancellationToken, MemoryStore, SqliteStore};
use statedb_cli::{commands, WorkspaceCommand};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_backend() -> Backend<MemoryStore> {
    Backend::new(Arc::new(MemoryStore::new()), "public").unwrap()
}

async fn run<S: statedb_backend::StateStore + 'static>(
    backend: &Backend<S>,
    command: WorkspaceCommand,
) -> anyhow::Result<String> {
    let mut out = Vec::new();
    commands::run(backend, command, &CancellationToken::new(), &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
}

fn new(name: &str) -> WorkspaceCommand {
    WorkspaceCommand::New {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn list_prints_default_first() {
    let backend = memory_backend();
    run(&backend, new("zeta")).await.unwrap();
    run(&backend, new("alpha")).await.unwrap();

    let output = run(&backend, WorkspaceCommand::List).await.unwrap();
    assert_eq!(output, "default\nalpha\nzeta\n");
}

#[tokio::test]
async fn new_rejects_existing_workspace() {
    let backend = memory_backend();
    let output = run(&backend, new("feature-x")).await.unwrap();
    assert_eq!(output, "Created workspace \"feature-x\"\n");

    let err = run(&backend, new("feature-x")).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));

    let err = run(&backend, new("default")).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn new_rejects_empty_name() {
    let backend = memory_backend();
    let err = run(&backend, new("")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::Validation(_))
    ));
}

#[tokio::test]
async fn show_prints_state_json() {
    let backend = memory_backend();
    let output = run(
        &backend,
        WorkspaceCommand::Show {
            name: "feature-x".to_string(),
        },
    )
    .await
    .unwrap();

    let document: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(document["version"], 4);
    assert_eq!(document["serial"], 0);
    assert!(!document["lineage"].as_str().unwrap().is_empty());

    // Showing created the workspace.
    let listed = run(&backend, WorkspaceCommand::List).await.unwrap();
    assert_eq!(listed, "default\nfeature-x\n");
}

#[tokio::test]
async fn show_default_without_record_prints_empty_state() {
    let backend = memory_backend();
    let output = run(
        &backend,
        WorkspaceCommand::Show {
            name: "default".to_string(),
        },
    )
    .await
    .unwrap();

    let document: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(document["version"], 4);
    assert_eq!(document["resources"], serde_json::json!([]));
}

#[tokio::test]
async fn delete_default_fails() {
    let backend = memory_backend();
    let err = run(
        &backend,
        WorkspaceCommand::Delete {
            name: "default".to_string(),
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Invalid input: can't delete default state");
}

#[tokio::test]
async fn delete_removes_workspace() {
    let backend = memory_backend();
    run(&backend, new("feature-x")).await.unwrap();

    let output = run(
        &backend,
        WorkspaceCommand::Delete {
            name: "feature-x".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(output, "Deleted workspace \"feature-x\"\n");

    let listed = run(&backend, WorkspaceCommand::List).await.unwrap();
    assert_eq!(listed, "default\n");
}

#[tokio::test]
async fn cancelled_command_reports_cancellation() {
    let backend = memory_backend();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    let err = commands::run(&backend, new("feature-x"), &cancel, &mut out)
        .await
        .unwrap_err();

    let backend_err = err.downcast_ref::<BackendError>().unwrap();
    assert!(backend_err.is_cancelled());
    assert!(out.is_empty());
}

#[tokio::test]
async fn workspaces_persist_across_store_instances() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("state.db");

    {
        let store = SqliteStore::open(&db_path).await.unwrap();
        let backend = Backend::new(Arc::new(store), "public").unwrap();
        run(&backend, new("feature-x")).await.unwrap();
    }

    let store = SqliteStore::open(&db_path).await.unwrap();
    let backend = Backend::new(Arc::new(store.clone()), "public").unwrap();
    let listed = run(&backend, WorkspaceCommand::List).await.unwrap();
    assert_eq!(listed, "default\nfeature-x\n");

    let other = Backend::new(Arc::new(store), "staging").unwrap();
    let listed = run(&other, WorkspaceCommand::List).await.unwrap();
    assert_eq!(listed, "default\n");
}
