// src/cli.rs
//! CLI definitions for bundleguard
//!
//! - `resolve` - Rewrite colliding identifiers in place
//! - `scan` - Report verdicts and the rewrite plan without modifying anything

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bundleguard")]
#[command(author, version)]
#[command(about = "Resolve bundle identifier collisions in application archives", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rewrite colliding component identifiers in an archive
    Resolve {
        /// Path to the application archive (.ipa)
        archive: PathBuf,

        /// Canonical identifier of the root app
        #[arg(short, long)]
        identifier: String,

        /// Correlation token used in backup names (random if omitted)
        #[arg(short, long)]
        token: Option<String>,

        /// Engine configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write residual collisions here if verification fails
        #[arg(long)]
        diagnostics: Option<PathBuf>,

        /// Write the run result as JSON here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the run result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show component verdicts and planned rewrites without modifying the archive
    Scan {
        /// Path to the application archive (.ipa)
        archive: PathBuf,

        /// Canonical identifier of the root app
        #[arg(short, long)]
        identifier: String,

        /// Engine configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the scan report as JSON
        #[arg(long)]
        json: bool,
    },
}
