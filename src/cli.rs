use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Convoy - deployment orchestrator for versioned releases
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Exit codes: 0 all hosts succeeded, 1 any host failed, 2 usage/config error.")]
pub struct Cli {
    /// Output NDJSON events for CI
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file
    #[arg(short, long, default_value = "convoy.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Roll a release out to the targeted hosts
    Deploy {
        /// Release version identifier (e.g. "1.4.2" or a git sha)
        version: String,

        /// Local artifact directory to deploy
        #[arg(short, long)]
        artifact: PathBuf,

        /// Expected artifact digest ("sha256:<hex>")
        #[arg(long)]
        checksum: Option<String>,

        /// Comma-separated host tags (or ids); default is every host
        #[arg(long, value_name = "TAGS")]
        hosts: Option<String>,

        /// Show the plan without touching any host
        #[arg(long)]
        dry_run: bool,

        /// Do not roll back automatically when a step fails
        #[arg(long)]
        no_rollback: bool,
    },

    /// Roll one host back to its last-known-good release
    Rollback {
        /// Host identifier from the inventory
        host: String,
    },

    /// Show recorded release state per host
    Status {
        /// Limit to one host
        host: Option<String>,
    },
}
