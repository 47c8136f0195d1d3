//! Workspace subcommand handlers.
//!
//! Handlers write their results to the supplied writer and report failures as
//! errors; mapping to an exit status happens in `main`.

use crate::cli::WorkspaceCommand;
use anyhow::{bail, Context, Result};
use statedb_backend::{Backend, CancellationToken, StateDocument, StateManager, StateStore};
use std::io::Write;
use tracing::{info, instrument};

pub async fn run<S: StateStore + 'static>(
    backend: &Backend<S>,
    command: WorkspaceCommand,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        WorkspaceCommand::List => list(backend, cancel, out).await,
        WorkspaceCommand::New { name } => new(backend, &name, cancel, out).await,
        WorkspaceCommand::Show { name } => show(backend, &name, cancel, out).await,
        WorkspaceCommand::Delete { name } => delete(backend, &name, cancel, out).await,
    }
}

async fn list<S: StateStore + 'static>(
    backend: &Backend<S>,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let names = backend.workspaces(cancel).await?;
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

#[instrument(skip(backend, cancel, out), fields(namespace = %backend.namespace()))]
async fn new<S: StateStore + 'static>(
    backend: &Backend<S>,
    name: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    if !name.is_empty() && backend.catalog().contains(name, cancel).await? {
        bail!("workspace {name:?} already exists");
    }

    backend.state_mgr(name, cancel).await?;
    info!(workspace = name, "workspace created");
    writeln!(out, "Created workspace {name:?}")?;
    Ok(())
}

#[instrument(skip(backend, cancel, out), fields(namespace = %backend.namespace()))]
async fn show<S: StateStore + 'static>(
    backend: &Backend<S>,
    name: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let manager = backend.state_mgr(name, cancel).await?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("refreshing state for workspace {name:?} was cancelled"),
        refreshed = manager.refresh_state() => {
            refreshed.with_context(|| format!("failed to read state for workspace {name:?}"))?;
        }
    }

    // The default workspace has no record until something persists to it.
    let document = manager.state().unwrap_or_else(StateDocument::empty);
    out.write_all(&document.encode()?)?;
    writeln!(out)?;
    Ok(())
}

#[instrument(skip(backend, cancel, out), fields(namespace = %backend.namespace()))]
async fn delete<S: StateStore + 'static>(
    backend: &Backend<S>,
    name: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    backend.delete_workspace(name, cancel).await?;
    info!(workspace = name, "workspace deleted");
    writeln!(out, "Deleted workspace {name:?}")?;
    Ok(())
}
