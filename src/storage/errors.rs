//! Storage error types
//!
//! Error codes:
//! - AERO_STORAGE_IO_ERROR (ERROR severity)
//! - AERO_BAD_INDEXES (FATAL severity) - structural corruption at an offset

use std::fmt;
use std::io;

use thiserror::Error;

/// Severity levels shared by the engine's error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, table stays usable
    Error,
    /// Structural corruption: the operation cannot continue on this data
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Record file errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Misaligned or out-of-bounds offset, unexpected marker, truncated record
    #[error("bad indexes at offset {offset}: {reason}")]
    BadIndexes { offset: u64, reason: String },
}

impl StorageError {
    /// Create a bad-indexes error
    pub fn bad_indexes(offset: u64, reason: impl Into<String>) -> Self {
        StorageError::BadIndexes {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Io(_) => "AERO_STORAGE_IO_ERROR",
            StorageError::BadIndexes { .. } => "AERO_BAD_INDEXES",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            StorageError::Io(_) => Severity::Error,
            StorageError::BadIndexes { .. } => Severity::Fatal,
        }
    }

    /// Returns whether this error is fatal to the calling operation
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let io = StorageError::from(io::Error::new(io::ErrorKind::Other, "disk"));
        assert_eq!(io.code(), "AERO_STORAGE_IO_ERROR");
        assert_eq!(io.severity(), Severity::Error);

        let bad = StorageError::bad_indexes(12, "misaligned");
        assert_eq!(bad.code(), "AERO_BAD_INDEXES");
        assert!(bad.is_fatal());
    }

    #[test]
    fn test_display_carries_offset() {
        let err = StorageError::bad_indexes(1024, "unexpected marker 0x00");
        let display = err.to_string();
        assert!(display.contains("1024"));
        assert!(display.contains("unexpected marker"));
    }
}
