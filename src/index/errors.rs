//! Index error types
//!
//! Error codes:
//! - AERO_INDEX_IO_ERROR (ERROR)
//! - AERO_INDEX_CORRUPTED (FATAL)
//! - AERO_INDEX_NOT_OPEN (ERROR)
//! - AERO_INDEX_KEY_MISMATCH (ERROR)

use std::fmt;
use std::io;

use crate::storage::Severity;

/// Index-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorCode {
    /// Side file could not be read or written
    AeroIndexIoError,
    /// Side file failed magic, length or checksum validation
    AeroIndexCorrupted,
    /// Operation on an index that has not been opened
    AeroIndexNotOpen,
    /// Key shape differs from the index's template
    AeroIndexKeyMismatch,
}

impl IndexErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            IndexErrorCode::AeroIndexIoError => "AERO_INDEX_IO_ERROR",
            IndexErrorCode::AeroIndexCorrupted => "AERO_INDEX_CORRUPTED",
            IndexErrorCode::AeroIndexNotOpen => "AERO_INDEX_NOT_OPEN",
            IndexErrorCode::AeroIndexKeyMismatch => "AERO_INDEX_KEY_MISMATCH",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            IndexErrorCode::AeroIndexCorrupted => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for IndexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Index error type with full context
#[derive(Debug)]
pub struct IndexError {
    code: IndexErrorCode,
    /// Name of the index that failed
    index: String,
    message: String,
    source: Option<io::Error>,
}

impl IndexError {
    /// Side file I/O failure
    pub fn io(index: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexIoError,
            index: index.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Side file failed validation
    pub fn corrupted(index: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexCorrupted,
            index: index.into(),
            message: reason.into(),
            source: None,
        }
    }

    /// Used before `open`
    pub fn not_open(index: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexNotOpen,
            index: index.into(),
            message: "index is not open".to_string(),
            source: None,
        }
    }

    /// Key does not match the index's key shape
    pub fn key_mismatch(index: impl Into<String>, key: impl fmt::Display) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexKeyMismatch,
            index: index.into(),
            message: format!("key {} does not match the index key shape", key),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> IndexErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the index name
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: index '{}': {}",
            self.code.severity(),
            self.code.code(),
            self.index,
            self.message
        )
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IndexErrorCode::AeroIndexIoError.code(), "AERO_INDEX_IO_ERROR");
        assert_eq!(IndexErrorCode::AeroIndexCorrupted.code(), "AERO_INDEX_CORRUPTED");
        assert_eq!(IndexErrorCode::AeroIndexNotOpen.code(), "AERO_INDEX_NOT_OPEN");
        assert_eq!(IndexErrorCode::AeroIndexKeyMismatch.code(), "AERO_INDEX_KEY_MISMATCH");
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(IndexError::corrupted("age", "bad magic").is_fatal());
        assert!(!IndexError::not_open("age").is_fatal());
    }

    #[test]
    fn test_display_names_index() {
        let err = IndexError::corrupted("age", "checksum mismatch");
        let display = err.to_string();
        assert!(display.contains("AERO_INDEX_CORRUPTED"));
        assert!(display.contains("'age'"));
        assert!(display.contains("checksum mismatch"));
    }
}
