//! CLI-specific error types
//!
//! All CLI errors end the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::table::TableError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout)
    IoError,
    /// Table could not be opened
    OpenFailed,
    /// A maintenance operation failed
    OperationFailed,
    /// The integrity check found problems
    CheckFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "AERO_CLI_CONFIG_ERROR",
            Self::IoError => "AERO_CLI_IO_ERROR",
            Self::OpenFailed => "AERO_CLI_OPEN_FAILED",
            Self::OperationFailed => "AERO_CLI_OPERATION_FAILED",
            Self::CheckFailed => "AERO_CLI_CHECK_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Open failed
    pub fn open_failed(e: &TableError) -> Self {
        Self::new(CliErrorCode::OpenFailed, format!("{}: {}", e.code(), e))
    }

    /// Operation failed
    pub fn operation_failed(e: &TableError) -> Self {
        Self::new(CliErrorCode::OperationFailed, format!("{}: {}", e.code(), e))
    }

    /// Integrity check failed
    pub fn check_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::CheckFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<TableError> for CliError {
    fn from(e: TableError) -> Self {
        Self::operation_failed(&e)
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_errors_keep_their_code() {
        let err: CliError = TableError::bad_indexes(12, "truncated").into();
        assert_eq!(err.code_str(), "AERO_CLI_OPERATION_FAILED");
        assert!(err.message().starts_with("AERO_BAD_INDEXES"));
        assert!(err.to_string().contains("offset 12"));
    }
}
