use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pagesync", version, about = "Graph API page ingestion")]
pub struct Cli {
    /// Env file loaded before configuration is read.
    #[arg(long = "env", value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Ingest every configured token once (default if no subcommand given).
    Run,

    /// Create the store tables if they do not exist.
    Migrate,

    /// Print the effective configuration (redacted secrets).
    Config,
}
