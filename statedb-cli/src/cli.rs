use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "statedb")]
#[command(about = "Manage workspaces stored in a shared state database")]
#[command(version)]
pub struct Args {
    /// Path to the SQLite database (overrides STATEDB_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Namespace holding the workspaces (overrides STATEDB_NAMESPACE)
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Workspace management
    #[command(subcommand)]
    Workspace(WorkspaceCommand),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum WorkspaceCommand {
    /// List workspaces, default first
    List,
    /// Create a workspace with an empty state
    New {
        /// Workspace name
        name: String,
    },
    /// Print a workspace's state as JSON, creating it if needed
    Show {
        /// Workspace name
        name: String,
    },
    /// Delete a workspace
    Delete {
        /// Workspace name
        name: String,
    },
}
