use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "devhost", version, about = "Local development environment orchestrator")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(
        short = 'f',
        long = "config-file",
        env = "DEVHOST_CONFIG",
        global = true
    )]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start projects and stream their logs until Ctrl+C
    Up {
        /// Projects to start (all auto_start projects if empty)
        projects: Vec<String>,
    },
    /// Stop a project started by an earlier session
    Stop {
        /// Project id
        project: String,
    },
    /// Show project status
    Ps,
    /// Show stored logs for a project
    Logs {
        /// Project id
        project: String,
        /// Only show the last N entries
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },
    /// Show managed dependency status
    Deps,
    /// Kill processes left behind by a previous session
    Reconcile,
}
