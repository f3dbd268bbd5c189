//! CLI argument definitions.
//!
//! All arguments are defined with clap's derive macros; [`Cli`] is the entry
//! point.

use clap::Parser;
use std::path::PathBuf;

/// Director - declarative runner for nested sequential and parallel
/// command groups.
#[derive(Debug, Parser)]
#[command(name = "director")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the workflow script
    pub script: PathBuf,

    /// Suppress per-step progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Print the final status tree as JSON before exiting
    #[arg(long)]
    pub snapshot_on_exit: bool,
}
