//! JSON output for the CLI
//!
//! - One JSON object per line on stdout
//! - `{"status":"ok","data":...}` or `{"status":"error","code":...}`

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

fn write_line<W: Write>(out: &mut W, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    write_line(&mut io::stdout().lock(), &response)
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    write_line(&mut io::stdout().lock(), &response)
}
