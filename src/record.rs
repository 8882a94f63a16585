//! Records and their state machine
//!
//! ```text
//!   new_record ──► NEW ──commit──► NORMAL ◄──commit── UPDATED
//!                                    │  └────set────────►│
//!                                    └──delete──► DELETED ◄──delete──┘
//! ```
//!
//! - Setting a field of a NORMAL record snapshots the prior values once
//! - Commit is allowed from NEW and UPDATED; delete from NORMAL and UPDATED
//! - Every access to a DELETED record fails

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::blob::BlobHandle;
use crate::column::{ColumnType, ColumnValue};
use crate::table::{TableEngine, TableError, TableResult, TableSchema};

/// Lifecycle state of a [`Record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Never saved
    New,
    /// Matches what is on disk
    Normal,
    /// Saved once, modified since
    Updated,
    /// Tombstoned
    Deleted,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::New => "NEW",
            RecordState::Normal => "NORMAL",
            RecordState::Updated => "UPDATED",
            RecordState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of a table, detached from the file until committed
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<TableSchema>,
    offset: Option<u64>,
    values: Vec<ColumnValue>,
    snapshot: Option<Vec<ColumnValue>>,
    state: RecordState,
}

impl Record {
    pub(crate) fn new(schema: Arc<TableSchema>, values: Vec<ColumnValue>) -> Self {
        Self {
            schema,
            offset: None,
            values,
            snapshot: None,
            state: RecordState::New,
        }
    }

    pub(crate) fn loaded(schema: Arc<TableSchema>, offset: u64, values: Vec<ColumnValue>) -> Self {
        Self {
            schema,
            offset: Some(offset),
            values,
            snapshot: None,
            state: RecordState::Normal,
        }
    }

    /// Reuses this record for another row of the same table
    pub(crate) fn reinit(&mut self, offset: u64, values: Vec<ColumnValue>) {
        self.offset = Some(offset);
        self.values = values;
        self.snapshot = None;
        self.state = RecordState::Normal;
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// File offset, once saved
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn readable(&self, operation: &'static str) -> TableResult<()> {
        if self.state == RecordState::Deleted {
            return Err(TableError::InvalidRecordState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    pub fn values(&self) -> TableResult<&[ColumnValue]> {
        self.readable("read")?;
        Ok(&self.values)
    }

    /// Value of the column at `ordinal`
    pub fn get_at(&self, ordinal: usize) -> TableResult<&ColumnValue> {
        self.readable("read")?;
        self.values
            .get(ordinal)
            .ok_or_else(|| TableError::ColumnNotFound(format!("#{}", ordinal)))
    }

    pub fn get(&self, column: &str) -> TableResult<&ColumnValue> {
        let ordinal = self.schema.ordinal_of(column)?;
        self.get_at(ordinal)
    }

    fn mismatch(&self, column: &str, expected: ColumnType) -> TableError {
        let actual = self
            .schema
            .column_named(column)
            .map(|c| c.column_type())
            .unwrap_or(expected);
        TableError::TypeMismatch {
            column: column.to_string(),
            expected,
            actual,
        }
    }

    pub fn get_int(&self, column: &str) -> TableResult<i32> {
        self.get(column)?
            .as_int()
            .ok_or_else(|| self.mismatch(column, ColumnType::Int))
    }

    pub fn get_double(&self, column: &str) -> TableResult<f64> {
        self.get(column)?
            .as_double()
            .ok_or_else(|| self.mismatch(column, ColumnType::Double))
    }

    pub fn get_date_time(&self, column: &str) -> TableResult<NaiveDateTime> {
        self.get(column)?
            .as_date_time()
            .copied()
            .ok_or_else(|| self.mismatch(column, ColumnType::DateTime))
    }

    pub fn get_string(&self, column: &str) -> TableResult<&str> {
        self.get(column)?
            .as_str()
            .ok_or_else(|| self.mismatch(column, ColumnType::String))
    }

    pub fn get_blob(&self, column: &str) -> TableResult<BlobHandle> {
        self.get(column)?
            .as_blob()
            .ok_or_else(|| self.mismatch(column, ColumnType::Blob))
    }

    /// Sets a field by column name
    pub fn set(&mut self, column: &str, value: impl Into<ColumnValue>) -> TableResult<()> {
        let ordinal = self.schema.ordinal_of(column)?;
        self.set_at(ordinal, value.into())
    }

    /// Sets a field by ordinal. The value must match the column type.
    pub fn set_at(&mut self, ordinal: usize, value: ColumnValue) -> TableResult<()> {
        self.readable("set")?;
        self.schema.check_value(ordinal, &value)?;
        if self.state == RecordState::Normal {
            self.snapshot = Some(self.values.clone());
            self.state = RecordState::Updated;
        }
        self.values[ordinal] = value;
        Ok(())
    }

    /// Saves the record. Returns its offset, which changes when a table
    /// that cannot update in place rewrites it.
    pub fn commit(&mut self, engine: &mut TableEngine) -> TableResult<u64> {
        match self.state {
            RecordState::New | RecordState::Updated => {}
            state => {
                return Err(TableError::InvalidRecordState {
                    operation: "commit",
                    state,
                })
            }
        }
        let offset = engine.commit(self.offset, self.snapshot.as_deref(), &self.values)?;
        self.offset = Some(offset);
        self.snapshot = None;
        self.state = RecordState::Normal;
        Ok(offset)
    }

    pub fn delete(&mut self, engine: &mut TableEngine) -> TableResult<()> {
        let offset = match (self.state, self.offset) {
            (RecordState::Normal | RecordState::Updated, Some(offset)) => offset,
            (state, _) => {
                return Err(TableError::InvalidRecordState {
                    operation: "delete",
                    state,
                })
            }
        };
        engine.delete(offset)?;
        self.snapshot = None;
        self.state = RecordState::Deleted;
        Ok(())
    }
}
