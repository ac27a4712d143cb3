pub mod progress;
pub mod prompt;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "catalog-tracker")]
#[command(about = "Keeps content-addressed catalogs of directory trees up to date", long_about = None)]
pub struct Cli {
    /// Configuration file to read instead of ./Config.*
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Track every configured root until Enter is pressed
    Watch,
    /// Walk every configured root once and reconcile its catalog
    Reconcile {
        /// Compute and print the actions without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show catalogs and their entry counts
    Status,
    /// Print configuration values
    PrintConfig,
    /// Remove every catalog and entry from the database
    TruncateDb,
}
