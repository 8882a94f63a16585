//! CLI argument definitions using clap
//!
//! Commands:
//! - aerotable dump --config <path>
//! - aerotable check --config <path>
//! - aerotable rebuild --config <path> [--reset-identity]
//! - aerotable defragment --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerotable - inspect and maintain table files
#[derive(Parser, Debug)]
#[command(name = "aerotable")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every record as one JSON line
    Dump {
        /// Path to table configuration file
        #[arg(long, default_value = "./aerotable.json")]
        config: PathBuf,
    },

    /// Verify records and indexes without changing anything
    Check {
        /// Path to table configuration file
        #[arg(long, default_value = "./aerotable.json")]
        config: PathBuf,
    },

    /// Repair the record file and rebuild every index
    Rebuild {
        /// Path to table configuration file
        #[arg(long, default_value = "./aerotable.json")]
        config: PathBuf,

        /// Set the identity counter to one past the largest stored id
        #[arg(long)]
        reset_identity: bool,
    },

    /// Rewrite the record file without deleted records
    Defragment {
        /// Path to table configuration file
        #[arg(long, default_value = "./aerotable.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
