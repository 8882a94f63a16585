//! Tables
//!
//! A [`Table`] is one record file plus its indexes behind a single lock.
//!
//! - Records are appended; fixed-size tables without strings or BLOBs
//!   update in place, all others tombstone and append
//! - Every index entry maps a key to a record offset
//! - Queries hold the lock through the returned [`ResultSet`]; while one is
//!   alive, table calls from the same thread fail with `Busy` (use
//!   [`ResultSet::engine_mut`] to write through the held lock)
//! - Rebuild and defragment run under the same lock
//!
//! Metadata (count, identity counter, schema) lives in `<data>.meta.json`;
//! each index persists to `<data>.<name>.idx`.

mod builder;
mod config;
mod defragment;
mod diagnostics;
mod engine;
mod errors;
mod guard;
mod meta;
mod rebuild;
mod scan;
mod schema;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blob::BlobHandle;
use crate::column::{ColumnType, ColumnValue};
use crate::key::FixedLengthKey;
use crate::observability::{MetricsSnapshot, TableMetrics};
use crate::record::Record;
use crate::result_set::ResultSet;
use crate::storage::RecordMarker;

pub use builder::TableBuilder;
pub use config::{ColumnConfig, CompoundIndexConfig, CompoundValueIndexConfig, TableConfig, TableOptions};
pub use defragment::{DefragmentReport, TableDefragmentator};
pub use diagnostics::{DanglingEntry, IndexMismatch, IntegrityFault, IntegrityReport};
pub use engine::{IndexSlot, TableEngine};
pub use errors::{TableError, TableResult};
pub use guard::EngineGuard;
pub use meta::{ColumnMeta, TableMeta, META_VERSION};
pub use rebuild::{RebuildReport, TableRebuilder};
pub use schema::TableSchema;

use guard::EngineLock;

/// A table: record file, schema and indexes behind one lock
pub struct Table {
    engine: EngineLock,
    schema: Arc<TableSchema>,
    metrics: Arc<TableMetrics>,
    path: PathBuf,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.path)
            .field("columns", &self.schema.len())
            .finish()
    }
}

impl Table {
    pub fn builder(path: impl AsRef<Path>) -> TableBuilder {
        TableBuilder::new(path)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Acquires the table lock, blocking until it is free.
    ///
    /// Never call this, or the plain accessors below that return no
    /// `Result`, while a result set from this table is alive on the same
    /// thread: the lock is not reentrant and the call would block forever.
    pub fn lock(&self) -> EngineGuard<'_> {
        self.engine.lock()
    }

    /// Acquires the table lock, failing with `Busy` if this thread
    /// already holds it.
    pub fn try_lock(&self) -> TableResult<EngineGuard<'_>> {
        self.engine.acquire()
    }

    /// Number of live records
    pub fn count(&self) -> u64 {
        self.engine.lock().count()
    }

    pub fn file_len(&self) -> u64 {
        self.engine.lock().file_len()
    }

    /// Allocates the next identity value
    pub fn next_id(&self) -> i32 {
        self.engine.lock().allocate_id()
    }

    /// A NEW record with default values and, if configured, a fresh identity
    pub fn new_record(&self) -> Record {
        self.engine.lock().new_record()
    }

    /// Loads the normal record at `offset`
    pub fn get_record(&self, offset: u64) -> TableResult<Record> {
        self.engine.acquire()?.load(offset)
    }

    /// Tombstones the normal record at `offset`
    pub fn delete_record(&self, offset: u64) -> TableResult<()> {
        self.engine.acquire()?.delete(offset)
    }

    pub fn marker_at(&self, offset: u64) -> TableResult<RecordMarker> {
        self.engine.acquire()?.marker_at(offset)
    }

    pub fn commit(&self, record: &mut Record) -> TableResult<u64> {
        record.commit(&mut *self.engine.acquire()?)
    }

    pub fn delete(&self, record: &mut Record) -> TableResult<()> {
        record.delete(&mut *self.engine.acquire()?)
    }

    pub fn put_blob(&self, bytes: &[u8]) -> TableResult<BlobHandle> {
        self.engine.acquire()?.put_blob(bytes)
    }

    pub fn read_blob(&self, handle: BlobHandle) -> TableResult<Vec<u8>> {
        self.engine.acquire()?.read_blob(handle)
    }

    fn key_of(&self, column: &str, value: &ColumnValue) -> TableResult<(usize, FixedLengthKey)> {
        let ordinal = self.schema.ordinal_of(column)?;
        self.schema.check_value(ordinal, value)?;
        let key = self.schema.columns()[ordinal].key_for(value).ok_or_else(|| {
            TableError::InvalidSchema(format!("column '{}' cannot be searched", column))
        })?;
        Ok((ordinal, key))
    }

    fn no_index(columns: &[&str]) -> TableError {
        TableError::IndexNotFound(columns.join("+"))
    }

    /// Records whose `column` equals `value`, in offset order.
    ///
    /// String columns compare case-insensitively.
    pub fn select(&self, column: &str, value: impl Into<ColumnValue>) -> TableResult<ResultSet<'_>> {
        let value = value.into();
        let (ordinal, key) = self.key_of(column, &value)?;

        let mut engine = self.engine.acquire()?;
        let mut offsets = engine.take_offsets();
        engine
            .index_for(IndexSlot::Simple(ordinal))
            .map_err(|_| Self::no_index(&[column]))?
            .search_for_range_into(&key, &key, &mut offsets);
        let offsets = retain_matching(&mut engine, offsets, &[(ordinal, &value)])?;
        Ok(ResultSet::from_offsets(engine, offsets))
    }

    /// Records matching both column values, through a compound index
    pub fn select_compound(
        &self,
        first: (&str, ColumnValue),
        second: (&str, ColumnValue),
    ) -> TableResult<ResultSet<'_>> {
        let (a, ka) = self.key_of(first.0, &first.1)?;
        let (b, kb) = self.key_of(second.0, &second.1)?;
        let key = FixedLengthKey::compound(ka, kb);

        let mut engine = self.engine.acquire()?;
        let slot = engine
            .compound_slot(a, b)
            .ok_or_else(|| Self::no_index(&[first.0, second.0]))?;
        let mut offsets = engine.take_offsets();
        engine.index_for(slot)?.search_for_range_into(&key, &key, &mut offsets);
        let offsets = retain_matching(&mut engine, offsets, &[(a, &first.1), (b, &second.1)])?;
        Ok(ResultSet::from_offsets(engine, offsets))
    }

    /// Records with `low <= column <= high` in key order. A missing bound
    /// is open. Not available on string columns, whose keys are hashes.
    pub fn select_range(
        &self,
        column: &str,
        low: Option<ColumnValue>,
        high: Option<ColumnValue>,
    ) -> TableResult<ResultSet<'_>> {
        let ordinal = self.schema.ordinal_of(column)?;
        let col = &self.schema.columns()[ordinal];
        if col.column_type() == ColumnType::String {
            return Err(TableError::Unsupported(format!(
                "range query over string column '{}'",
                column
            )));
        }
        let template = col
            .key_template()
            .ok_or_else(|| Self::no_index(&[column]))?;
        let low = match low {
            Some(v) => self.key_of(column, &v)?.1,
            None => template.min_key(),
        };
        let high = match high {
            Some(v) => self.key_of(column, &v)?.1,
            None => template.max_key(),
        };

        let engine = self.engine.acquire()?;
        engine
            .index_for(IndexSlot::Simple(ordinal))
            .map_err(|_| Self::no_index(&[column]))?;
        ResultSet::enumerate(engine, IndexSlot::Simple(ordinal), low, high)
    }

    /// Records whose first column equals `first` and whose second column
    /// lies in `low..=high`, ordered by the second column.
    pub fn select_compound_range(
        &self,
        first: (&str, ColumnValue),
        second: &str,
        low: Option<ColumnValue>,
        high: Option<ColumnValue>,
    ) -> TableResult<ResultSet<'_>> {
        let (a, ka) = self.key_of(first.0, &first.1)?;
        let b = self.schema.ordinal_of(second)?;
        if self.schema.columns()[b].column_type() == ColumnType::String {
            return Err(TableError::Unsupported(format!(
                "range query over string column '{}'",
                second
            )));
        }

        let engine = self.engine.acquire()?;
        let slot = engine
            .compound_slot(a, b)
            .ok_or_else(|| Self::no_index(&[first.0, second]))?;
        let index = engine.index_for(slot)?;
        let second_template = index
            .key_template()
            .second()
            .cloned()
            .ok_or_else(|| Self::no_index(&[first.0, second]))?;
        let low_second = match low {
            Some(v) => self.key_of(second, &v)?.1,
            None => index
                .search_key_second()
                .unwrap_or_else(|| second_template.min_key()),
        };
        let high_second = match high {
            Some(v) => self.key_of(second, &v)?.1,
            None => second_template.max_key(),
        };
        let low = FixedLengthKey::compound(ka.clone(), low_second);
        let high = FixedLengthKey::compound(ka, high_second);
        ResultSet::enumerate(engine, slot, low, high)
    }

    /// Entries of a compound-with-value index for one (`first`, `second`)
    /// pair, ordered by the carried value. The value is available from
    /// `current_key().value()` without loading the record.
    pub fn select_compound_with_value(
        &self,
        first: (&str, ColumnValue),
        second: (&str, ColumnValue),
        value_column: &str,
    ) -> TableResult<ResultSet<'_>> {
        let (a, ka) = self.key_of(first.0, &first.1)?;
        let (b, kb) = self.key_of(second.0, &second.1)?;
        let v = self.schema.ordinal_of(value_column)?;

        let engine = self.engine.acquire()?;
        let slot = engine
            .compound_value_slot(a, b, v)
            .ok_or_else(|| Self::no_index(&[first.0, second.0, value_column]))?;
        let index = engine.index_for(slot)?;
        let value_template = index
            .key_template()
            .value()
            .cloned()
            .ok_or_else(|| Self::no_index(&[first.0, second.0, value_column]))?;
        let low_value = index
            .search_key_value()
            .unwrap_or_else(|| value_template.min_key());
        let low = FixedLengthKey::compound_and_value(ka.clone(), kb.clone(), low_value);
        let high = FixedLengthKey::compound_and_value(ka, kb, value_template.max_key());
        ResultSet::enumerate(engine, slot, low, high)
    }

    /// Every record in `column`'s index order
    pub fn select_all(&self, column: &str) -> TableResult<ResultSet<'_>> {
        let ordinal = self.schema.ordinal_of(column)?;
        let mut engine = self.engine.acquire()?;
        let mut offsets = engine.take_offsets();
        engine
            .index_for(IndexSlot::Simple(ordinal))
            .map_err(|_| Self::no_index(&[column]))?
            .get_all_offsets(&mut offsets);
        Ok(ResultSet::from_offsets(engine, offsets))
    }

    /// Rewrites the data file without dead records and rebuilds indexes.
    ///
    /// On failure the data file is left as it was and the cause is
    /// wrapped in `DefragmentFailed`.
    pub fn defragment(&self) -> TableResult<DefragmentReport> {
        let mut engine = self.engine.acquire()?;
        TableDefragmentator::new(&mut engine).run()
    }

    /// Repairs the record file and rebuilds every index from it.
    pub fn rebuild_indexes(&self, reset_identity: bool) -> TableResult<RebuildReport> {
        let mut engine = self.engine.acquire()?;
        TableRebuilder::new(&mut engine, reset_identity).run()
    }

    pub fn open_indexes(&self) -> TableResult<()> {
        self.engine.acquire()?.open_indexes()
    }

    /// Compacts index storage; `idle` allows a thorough pass
    pub fn defragment_indexes(&self, idle: bool) -> TableResult<()> {
        self.engine.acquire()?.defragment_indexes(idle)
    }

    pub fn flush(&self) -> TableResult<()> {
        self.engine.acquire()?.flush()
    }

    /// Flushes everything and closes the indexes
    pub fn shutdown(self) -> TableResult<()> {
        let mut engine = self.engine.into_inner();
        engine.shutdown()
    }

    /// Writes every physical record as a JSON line
    pub fn dump<W: Write>(&self, out: &mut W) -> TableResult<u64> {
        self.engine.acquire()?.dump(out)
    }

    pub fn check_integrity(&self) -> TableResult<IntegrityReport> {
        self.engine.acquire()?.check_integrity()
    }
}

/// Drops offsets whose string fields only matched by hash.
fn retain_matching(
    engine: &mut TableEngine,
    offsets: Vec<u64>,
    filters: &[(usize, &ColumnValue)],
) -> TableResult<Vec<u64>> {
    let strings: Vec<(usize, String)> = filters
        .iter()
        .filter_map(|(ordinal, value)| value.as_str().map(|s| (*ordinal, s.to_lowercase())))
        .collect();
    if strings.is_empty() {
        return Ok(offsets);
    }

    let mut kept = engine.take_offsets();
    for &offset in &offsets {
        let values = engine.read_values(offset)?;
        let matches = strings.iter().all(|(ordinal, wanted)| {
            values[*ordinal]
                .as_str()
                .is_some_and(|s| s.to_lowercase() == *wanted)
        });
        if matches {
            kept.push(offset);
        }
    }
    engine.recycle_offsets(offsets);
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn people(dir: &TempDir) -> Table {
        TableBuilder::new(dir.path().join("people.dat"))
            .column("id", ColumnType::Int)
            .column("city", ColumnType::String)
            .column("age", ColumnType::Int)
            .index("id")
            .index("city")
            .compound_index("city", "age")
            .identity("id")
            .open()
            .unwrap()
    }

    fn add(table: &Table, city: &str, age: i32) -> u64 {
        let mut r = table.new_record();
        r.set("city", city).unwrap();
        r.set("age", age).unwrap();
        table.commit(&mut r).unwrap()
    }

    #[test]
    fn test_string_select_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        add(&table, "Oslo", 30);
        add(&table, "OSLO", 40);
        add(&table, "Bergen", 50);

        assert_eq!(table.select("city", "oslo").unwrap().len(), Some(2));
        assert!(table.select("city", "Trondheim").unwrap().is_empty_set());
    }

    #[test]
    fn test_update_on_string_table_moves_record() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        let offset = add(&table, "Oslo", 30);

        let mut r = table.get_record(offset).unwrap();
        r.set("age", 31).unwrap();
        let moved = table.commit(&mut r).unwrap();

        assert_ne!(moved, offset);
        assert_eq!(table.marker_at(offset).unwrap(), RecordMarker::Deleted);
        assert_eq!(table.count(), 1);
        let rs = table.select_compound(("city", "oslo".into()), ("age", 31.into())).unwrap();
        assert_eq!(rs.len(), Some(1));
    }

    #[test]
    fn test_compound_range() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        for age in [50, 20, 35, 41] {
            add(&table, "Oslo", age);
        }
        add(&table, "Bergen", 30);

        let mut rs = table
            .select_compound_range(("city", "oslo".into()), "age", Some(ColumnValue::Int(30)), None)
            .unwrap();
        let mut ages = Vec::new();
        while rs.move_next() {
            ages.push(rs.current().unwrap().get_int("age").unwrap());
        }
        assert_eq!(ages, vec![35, 41, 50]);
    }

    #[test]
    fn test_range_on_string_column_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        let err = table.select_range("city", None, None).err().unwrap();
        assert_eq!(err.code(), "AERO_UNSUPPORTED");
    }

    #[test]
    fn test_missing_index_is_reported() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        let err = table.select("age", 3).err().unwrap();
        assert_eq!(err.code(), "AERO_INDEX_NOT_FOUND");
    }

    #[test]
    fn test_select_all_follows_key_order() {
        let dir = TempDir::new().unwrap();
        let table = people(&dir);
        add(&table, "b", 1);
        add(&table, "a", 2);
        let records = table.select_all("id").unwrap().into_records().unwrap();
        let ids: Vec<i32> = records.iter().map(|r| r.get_int("id").unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
