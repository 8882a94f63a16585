//! Table error types
//!
//! Error codes:
//! - AERO_TABLE_IO_ERROR (ERROR)
//! - AERO_BAD_INDEXES (FATAL) - structural corruption found by a read
//! - AERO_INVALID_RECORD_STATE (ERROR) - record state machine violation
//! - AERO_COLUMN_NOT_FOUND / AERO_INDEX_NOT_FOUND / AERO_INVALID_SCHEMA (ERROR)
//! - AERO_TYPE_MISMATCH / AERO_INVALID_VALUE (ERROR)
//! - AERO_DEFRAGMENT_FAILED (ERROR) - wraps the cause, original left intact
//! - AERO_META_ERROR (ERROR)
//! - AERO_CURSOR_OUT_OF_RANGE / AERO_UNSUPPORTED (ERROR)
//! - AERO_TABLE_BUSY (ERROR) - the calling thread already holds the table lock

use std::io;

use thiserror::Error;

use crate::blob::BlobError;
use crate::column::ColumnType;
use crate::index::IndexError;
use crate::record::RecordState;
use crate::storage::{Severity, StorageError};

/// Table errors
#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad indexes at offset {offset}: {reason}")]
    BadIndexes { offset: u64, reason: String },

    #[error("cannot {operation} a record in state {state}")]
    InvalidRecordState {
        operation: &'static str,
        state: RecordState,
    },

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("type mismatch on column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("defragmentation failed: {source}")]
    DefragmentFailed {
        #[source]
        source: Box<TableError>,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("metadata error: {0}")]
    Meta(String),

    #[error("result set cursor is out of range")]
    CursorOutOfRange,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("table is locked by a live result set on this thread")]
    Busy,
}

impl TableError {
    /// Create a bad-indexes error
    pub fn bad_indexes(offset: u64, reason: impl Into<String>) -> Self {
        TableError::BadIndexes {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            TableError::Io(_) => "AERO_TABLE_IO_ERROR",
            TableError::BadIndexes { .. } => "AERO_BAD_INDEXES",
            TableError::InvalidRecordState { .. } => "AERO_INVALID_RECORD_STATE",
            TableError::ColumnNotFound(_) => "AERO_COLUMN_NOT_FOUND",
            TableError::IndexNotFound(_) => "AERO_INDEX_NOT_FOUND",
            TableError::InvalidSchema(_) => "AERO_INVALID_SCHEMA",
            TableError::TypeMismatch { .. } => "AERO_TYPE_MISMATCH",
            TableError::InvalidValue { .. } => "AERO_INVALID_VALUE",
            TableError::DefragmentFailed { .. } => "AERO_DEFRAGMENT_FAILED",
            TableError::Index(e) => e.code().code(),
            TableError::Blob(e) => e.code(),
            TableError::Meta(_) => "AERO_META_ERROR",
            TableError::CursorOutOfRange => "AERO_CURSOR_OUT_OF_RANGE",
            TableError::Unsupported(_) => "AERO_UNSUPPORTED",
            TableError::Busy => "AERO_TABLE_BUSY",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            TableError::BadIndexes { .. } => Severity::Fatal,
            TableError::Index(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    /// True for structural corruption
    pub fn is_bad_indexes(&self) -> bool {
        matches!(self, TableError::BadIndexes { .. })
    }
}

impl From<StorageError> for TableError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io) => TableError::Io(io),
            StorageError::BadIndexes { offset, reason } => TableError::BadIndexes { offset, reason },
        }
    }
}

impl From<serde_json::Error> for TableError {
    fn from(e: serde_json::Error) -> Self {
        TableError::Meta(e.to_string())
    }
}

/// Result type for table operations
pub type TableResult<T> = Result<T, TableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_onto_table_errors() {
        let err: TableError = StorageError::bad_indexes(8, "misaligned").into();
        assert!(err.is_bad_indexes());
        assert_eq!(err.code(), "AERO_BAD_INDEXES");
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn test_defragment_failure_keeps_cause() {
        let err = TableError::DefragmentFailed {
            source: Box::new(TableError::bad_indexes(99, "offset past end of file")),
        };
        assert_eq!(err.code(), "AERO_DEFRAGMENT_FAILED");
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("99"));
    }

    #[test]
    fn test_state_error_display() {
        let err = TableError::InvalidRecordState {
            operation: "commit",
            state: RecordState::Deleted,
        };
        assert_eq!(err.to_string(), "cannot commit a record in state DELETED");
        assert_eq!(err.severity(), Severity::Error);
    }
}
