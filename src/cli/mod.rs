//! Command-line surface
//!
//! Every handler returns the report it would print, so the binary only
//! decides where it goes and which exit code follows.

pub mod code;
pub mod computer;
pub mod process;
pub mod rehash;

use clap::{Parser, Subcommand};
use tabled::{Table, Tabled, settings::Style};

use crate::{adapter::storage::StorageType, domain::error::EngineError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Storage backend, overriding the configuration file
    #[arg(long, global = true, value_enum)]
    pub storage: Option<StorageType>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up and manage codes
    Code {
        #[command(subcommand)]
        command: code::CodeCommands
    },
    /// Set up and inspect computers
    Computer {
        #[command(subcommand)]
        command: computer::ComputerCommands
    },
    /// Launch and control processes
    Process {
        #[command(subcommand)]
        command: process::ProcessCommands
    },
    /// Recompute the fingerprints of stored nodes
    Rehash(rehash::RehashArgs)
}

pub(crate) fn render_table<T: Tabled>(rows: impl IntoIterator<Item = T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Prompt failures are reported as generic errors, never as storage errors
pub(crate) fn prompt_failed(err: std::io::Error) -> EngineError {
    EngineError::Generic(format!("Prompt failed: {}", err))
}
