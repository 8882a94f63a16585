//! Query results
//!
//! A result set holds the table lock for as long as it lives, so the
//! records it yields cannot change underneath it. Three shapes exist:
//!
//! - `Empty`: nothing matched; holds no lock
//! - `Offsets`: a materialized offset list with random access
//! - `Enumerable`: a live index range scan, forward only
//!
//! Records are loaded lazily into a single reused cursor record. Other table
//! calls from the thread holding a live set return `Busy`; write through
//! [`ResultSet::engine_mut`] instead.

use std::sync::Arc;

use crate::index::{IndexEntry, IndexEnumerator};
use crate::key::FixedLengthKey;
use crate::record::Record;
use crate::table::{EngineGuard, IndexSlot, TableEngine, TableError, TableResult};

/// Loads the record at `offset` into `cursor`, reusing its allocation.
fn load_into<'c>(engine: &mut TableEngine, cursor: &'c mut Option<Record>, offset: u64) -> TableResult<&'c Record> {
    let values = engine.read_values(offset)?;
    let schema = engine.schema();
    let record = cursor.get_or_insert_with(|| Record::loaded(Arc::clone(schema), offset, Vec::new()));
    record.reinit(offset, values);
    Ok(record)
}

/// Materialized list of record offsets
pub struct OffsetResultSet<'t> {
    guard: EngineGuard<'t>,
    offsets: Vec<u64>,
    position: Option<usize>,
    cursor: Option<Record>,
    loaded: Option<usize>,
}

impl<'t> OffsetResultSet<'t> {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn move_next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.offsets.len()));
        next < self.offsets.len()
    }

    pub fn current(&mut self) -> TableResult<&Record> {
        match self.position {
            Some(p) if p < self.offsets.len() => self.get(p),
            _ => Err(TableError::CursorOutOfRange),
        }
    }

    /// Record at position `index`
    pub fn get(&mut self, index: usize) -> TableResult<&Record> {
        let offset = *self.offsets.get(index).ok_or(TableError::CursorOutOfRange)?;
        if self.loaded != Some(index) || self.cursor.is_none() {
            self.loaded = None;
            load_into(&mut self.guard, &mut self.cursor, offset)?;
            self.loaded = Some(index);
        }
        self.cursor.as_ref().ok_or(TableError::CursorOutOfRange)
    }

    pub fn current_offset(&self) -> Option<u64> {
        self.position.and_then(|p| self.offsets.get(p).copied())
    }

    pub fn reset(&mut self) {
        self.position = None;
    }
}

impl Drop for OffsetResultSet<'_> {
    fn drop(&mut self) {
        let offsets = std::mem::take(&mut self.offsets);
        self.guard.recycle_offsets(offsets);
    }
}

/// Forward scan over an index key range
pub struct EnumerableResultSet<'t> {
    guard: EngineGuard<'t>,
    slot: IndexSlot,
    low: FixedLengthKey,
    high: FixedLengthKey,
    enumerator: IndexEnumerator,
    entry: Option<IndexEntry>,
    cursor: Option<Record>,
    loaded: bool,
}

impl<'t> EnumerableResultSet<'t> {
    pub fn move_next(&mut self) -> bool {
        self.entry = self.enumerator.next();
        self.loaded = false;
        self.entry.is_some()
    }

    pub fn current(&mut self) -> TableResult<&Record> {
        let offset = self.entry.as_ref().ok_or(TableError::CursorOutOfRange)?.offset;
        if !self.loaded || self.cursor.is_none() {
            load_into(&mut self.guard, &mut self.cursor, offset)?;
            self.loaded = true;
        }
        self.cursor.as_ref().ok_or(TableError::CursorOutOfRange)
    }

    /// Full index key of the current entry
    pub fn current_key(&self) -> Option<&FixedLengthKey> {
        self.entry.as_ref().map(|e| &e.key)
    }

    pub fn current_offset(&self) -> Option<u64> {
        self.entry.as_ref().map(|e| e.offset)
    }

    /// Restarts the scan over the same key range
    pub fn reset(&mut self) -> TableResult<()> {
        self.enumerator = self.guard.index_for(self.slot)?.search_for_range(&self.low, &self.high);
        self.entry = None;
        self.loaded = false;
        Ok(())
    }
}

/// Records produced by a query
pub enum ResultSet<'t> {
    Empty,
    Offsets(OffsetResultSet<'t>),
    Enumerable(EnumerableResultSet<'t>),
}

impl<'t> ResultSet<'t> {
    /// Wraps an offset list; an empty list yields `Empty` and releases the lock
    pub(crate) fn from_offsets(mut guard: EngineGuard<'t>, offsets: Vec<u64>) -> Self {
        if offsets.is_empty() {
            guard.recycle_offsets(offsets);
            return ResultSet::Empty;
        }
        ResultSet::Offsets(OffsetResultSet {
            guard,
            offsets,
            position: None,
            cursor: None,
            loaded: None,
        })
    }

    pub(crate) fn enumerate(
        guard: EngineGuard<'t>,
        slot: IndexSlot,
        low: FixedLengthKey,
        high: FixedLengthKey,
    ) -> TableResult<Self> {
        let enumerator = guard.index_for(slot)?.search_for_range(&low, &high);
        Ok(ResultSet::Enumerable(EnumerableResultSet {
            guard,
            slot,
            low,
            high,
            enumerator,
            entry: None,
            cursor: None,
            loaded: false,
        }))
    }

    /// Number of records, when known without scanning
    pub fn len(&self) -> Option<usize> {
        match self {
            ResultSet::Empty => Some(0),
            ResultSet::Offsets(set) => Some(set.len()),
            ResultSet::Enumerable(_) => None,
        }
    }

    pub fn is_empty_set(&self) -> bool {
        matches!(self, ResultSet::Empty)
    }

    /// Advances the cursor; false once past the last record
    pub fn move_next(&mut self) -> bool {
        match self {
            ResultSet::Empty => false,
            ResultSet::Offsets(set) => set.move_next(),
            ResultSet::Enumerable(set) => set.move_next(),
        }
    }

    /// Record under the cursor
    pub fn current(&mut self) -> TableResult<&Record> {
        match self {
            ResultSet::Empty => Err(TableError::CursorOutOfRange),
            ResultSet::Offsets(set) => set.current(),
            ResultSet::Enumerable(set) => set.current(),
        }
    }

    /// Random access; offset lists only
    pub fn get(&mut self, index: usize) -> TableResult<&Record> {
        match self {
            ResultSet::Empty => Err(TableError::CursorOutOfRange),
            ResultSet::Offsets(set) => set.get(index),
            ResultSet::Enumerable(_) => Err(TableError::Unsupported(
                "random access on an enumerable result set".into(),
            )),
        }
    }

    pub fn reset(&mut self) -> TableResult<()> {
        match self {
            ResultSet::Empty => Ok(()),
            ResultSet::Offsets(set) => {
                set.reset();
                Ok(())
            }
            ResultSet::Enumerable(set) => set.reset(),
        }
    }

    pub fn current_key(&self) -> Option<&FixedLengthKey> {
        match self {
            ResultSet::Enumerable(set) => set.current_key(),
            _ => None,
        }
    }

    pub fn current_offset(&self) -> Option<u64> {
        match self {
            ResultSet::Empty => None,
            ResultSet::Offsets(set) => set.current_offset(),
            ResultSet::Enumerable(set) => set.current_offset(),
        }
    }

    /// The locked engine, for committing records read from this set
    pub fn engine_mut(&mut self) -> Option<&mut TableEngine> {
        match self {
            ResultSet::Empty => None,
            ResultSet::Offsets(set) => Some(&mut *set.guard),
            ResultSet::Enumerable(set) => Some(&mut *set.guard),
        }
    }

    /// Drains the remaining records into owned copies
    pub fn into_records(mut self) -> TableResult<Vec<Record>> {
        let mut records = Vec::with_capacity(self.len().unwrap_or(0));
        while self.move_next() {
            records.push(self.current()?.clone());
        }
        Ok(records)
    }

    /// Releases the lock
    pub fn close(self) {}
}
