//! CLI surface: argument types and command handlers.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kse",
    version,
    about = "Spec orchestration engine driving autonomous codex agents"
)]
pub struct Cli {
    /// Workspace root containing the .kiro directory
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run specs to completion under the orchestration engine
    Run {
        /// Spec names (directories under .kiro/specs/)
        #[arg(required = true)]
        specs: Vec<String>,

        /// Cap concurrent agents for this run
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Dependency override, e.g. --dep api=schema,db (repeatable)
        #[arg(long = "dep", value_name = "SPEC=PREREQ[,PREREQ...]")]
        deps: Vec<String>,
    },

    /// Show the last persisted orchestration status
    Status,

    /// Print the bootstrap prompt for a spec
    Prompt {
        /// Spec name
        spec: String,
    },
}
