//! CLI module for aerotable
//!
//! Maintenance commands over a table described by a JSON config file:
//! - dump: print every physical record
//! - check: verify records against indexes
//! - rebuild: repair the file and rebuild indexes
//! - defragment: drop deleted records

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check, defragment, dump, rebuild, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
