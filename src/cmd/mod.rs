//! CLI command handlers

use clap::Subcommand;

pub mod diagnostics;
pub mod root;

#[derive(Subcommand)]
pub enum Commands {
    /// Check Docker connectivity and print the loaded pool summary
    Diagnostics,
}
