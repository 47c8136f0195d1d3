pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Args, Command, WorkspaceCommand};
pub use config::Config;
