use anyhow::{Context, Result};
use clap::Parser;
use statedb_backend::{Backend, CancellationToken, SqliteStore};
use statedb_cli::{commands, Args, Command, Config};
use statedb_logging::{init_subscriber, LogConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut log_config = LogConfig::from_env();
    if args.verbose {
        log_config = log_config.verbose();
    }
    let _log_guard = init_subscriber(&log_config);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_env().with_overrides(args.db, args.namespace);
    debug!(
        db_path = %config.db_path.display(),
        namespace = %config.namespace,
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let backend = Backend::new(Arc::new(store), config.namespace)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let Command::Workspace(command) = args.command;
    commands::run(&backend, command, &cancel, &mut std::io::stdout()).await
}
