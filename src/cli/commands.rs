//! CLI command implementations
//!
//! Each command loads the table configuration, opens the table, runs one
//! operation and shuts the table down. Results go to stdout as JSON.

use std::io::{self, Write};
use std::path::Path;

use serde_json::json;

use crate::table::{Table, TableConfig};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Dump { config } => dump(&config, &mut io::stdout().lock()),
        Command::Check { config } => check(&config),
        Command::Rebuild { config, reset_identity } => rebuild(&config, reset_identity),
        Command::Defragment { config } => defragment(&config),
    }
}

fn open(config_path: &Path) -> CliResult<Table> {
    let config = TableConfig::load(config_path).map_err(|e| CliError::config_error(e.to_string()))?;
    config.open().map_err(|e| CliError::open_failed(&e))
}

/// Write every physical record of the table to `out`
pub fn dump<W: Write>(config_path: &Path, out: &mut W) -> CliResult<()> {
    let table = open(config_path)?;
    table.dump(out)?;
    out.flush()?;
    table.shutdown()?;
    Ok(())
}

/// Verify the table; fails if any inconsistency is found
pub fn check(config_path: &Path) -> CliResult<()> {
    let table = open(config_path)?;
    let report = table.check_integrity()?;
    let consistent = report.is_consistent();
    write_response(serde_json::to_value(&report)?)?;
    table.shutdown()?;

    if !consistent {
        return Err(CliError::check_failed(format!(
            "{} records, {} index mismatches, {} dangling entries, fault: {}",
            report.records,
            report.index_mismatches.len(),
            report.dangling_entries.len(),
            report
                .fault
                .as_ref()
                .map_or_else(|| "none".to_string(), |f| format!("{} at {}", f.reason, f.offset))
        )));
    }
    Ok(())
}

/// Repair the record file and rebuild all indexes
pub fn rebuild(config_path: &Path, reset_identity: bool) -> CliResult<()> {
    let table = open(config_path)?;
    let report = table.rebuild_indexes(reset_identity)?;
    write_response(json!({
        "rebuild": report,
        "metrics": table.metrics(),
    }))?;
    table.shutdown()?;
    Ok(())
}

/// Compact the record file
pub fn defragment(config_path: &Path) -> CliResult<()> {
    let table = open(config_path)?;
    let report = table.defragment()?;
    write_response(json!({ "defragment": report }))?;
    table.shutdown()?;
    Ok(())
}
