//! Record engine
//!
//! Owns the record file, the schema and every index of one table, and
//! keeps them consistent:
//!
//! - Commit writes a record and adds index entries for changed columns
//! - In-place update removes the old entries of changed columns first
//! - Update-disabled tables tombstone the old record and append a new one
//! - Delete removes every index entry, then flips the marker
//!
//! All access is serialized by the lock in [`super::Table`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blob::{BlobHandle, BlobStore};
use crate::column::ColumnValue;
use crate::index::{Index, IndexOpenOptions};
use crate::key::FixedLengthKey;
use crate::observability::{Logger, TableMetrics};
use crate::record::Record;
use crate::storage::{RecordFile, RecordMarker};

use super::config::TableOptions;
use super::errors::{TableError, TableResult};
use super::meta::{TableMeta, META_VERSION};
use super::schema::TableSchema;

/// Offset buffers kept for reuse by result sets
const OFFSET_POOL_LIMIT: usize = 8;

/// Location of an index in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSlot {
    /// Simple index of the column with this ordinal
    Simple(usize),
    /// Position in the compound registry
    Compound(usize),
    /// Position in the compound-with-value registry
    CompoundValue(usize),
}

/// Index over two columns
pub(crate) struct CompoundIndex {
    pub first: usize,
    pub second: usize,
    pub index: Box<dyn Index>,
}

/// Index over two columns whose key also carries a third column's value
pub(crate) struct CompoundValueIndex {
    pub first: usize,
    pub second: usize,
    pub value: usize,
    pub index: Box<dyn Index>,
}

pub(crate) fn compound_key(schema: &TableSchema, first: usize, second: usize, values: &[ColumnValue]) -> Option<FixedLengthKey> {
    let a = schema.column(first)?.key_for(&values[first])?;
    let b = schema.column(second)?.key_for(&values[second])?;
    Some(FixedLengthKey::compound(a, b))
}

pub(crate) fn compound_value_key(
    schema: &TableSchema,
    first: usize,
    second: usize,
    value: usize,
    values: &[ColumnValue],
) -> Option<FixedLengthKey> {
    let a = schema.column(first)?.key_for(&values[first])?;
    let b = schema.column(second)?.key_for(&values[second])?;
    let v = schema.column(value)?.key_for(&values[value])?;
    Some(FixedLengthKey::compound_and_value(a, b, v))
}

/// The state behind a table's lock
pub struct TableEngine {
    pub(super) file: RecordFile,
    pub(super) schema: Arc<TableSchema>,
    pub(super) simple: Vec<Option<Box<dyn Index>>>,
    pub(super) compound: Vec<CompoundIndex>,
    pub(super) compound_value: Vec<CompoundValueIndex>,
    pub(super) count: u64,
    pub(super) next_id: i32,
    pub(super) metrics: Arc<TableMetrics>,
    pub(super) blobs: Box<dyn BlobStore>,
    pub(super) options: TableOptions,
    offset_pool: Vec<Vec<u64>>,
    meta_path: PathBuf,
    meta_clean: bool,
    closed: bool,
}

impl TableEngine {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        file: RecordFile,
        schema: Arc<TableSchema>,
        simple: Vec<Option<Box<dyn Index>>>,
        compound: Vec<CompoundIndex>,
        compound_value: Vec<CompoundValueIndex>,
        metrics: Arc<TableMetrics>,
        blobs: Box<dyn BlobStore>,
        options: TableOptions,
    ) -> Self {
        let meta_path = TableMeta::path_for(file.path());
        Self {
            file,
            schema,
            simple,
            compound,
            compound_value,
            count: 0,
            next_id: 1,
            metrics,
            blobs,
            options,
            offset_pool: Vec::new(),
            meta_path,
            meta_clean: false,
            closed: false,
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Number of live records
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn file_len(&self) -> u64 {
        self.file.len()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    /// Next identity value, without allocating it
    pub fn peek_next_id(&self) -> i32 {
        self.next_id
    }

    /// Allocates the next identity value
    pub fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub(crate) fn index_open_options(&self) -> IndexOpenOptions {
        IndexOpenOptions::new(self.options.index_cache_pages)
    }

    fn indexes_mut(&mut self) -> Vec<&mut Box<dyn Index>> {
        let mut all: Vec<&mut Box<dyn Index>> = self.simple.iter_mut().flatten().collect();
        all.extend(self.compound.iter_mut().map(|c| &mut c.index));
        all.extend(self.compound_value.iter_mut().map(|c| &mut c.index));
        all
    }

    pub(crate) fn indexes(&self) -> Vec<&dyn Index> {
        let mut all: Vec<&dyn Index> = self.simple.iter().flatten().map(|i| i.as_ref()).collect();
        all.extend(self.compound.iter().map(|c| c.index.as_ref()));
        all.extend(self.compound_value.iter().map(|c| c.index.as_ref()));
        all
    }

    /// The index at `slot`
    pub fn index_for(&self, slot: IndexSlot) -> TableResult<&dyn Index> {
        let found = match slot {
            IndexSlot::Simple(ordinal) => self.simple.get(ordinal).and_then(|s| s.as_deref()),
            IndexSlot::Compound(i) => self.compound.get(i).map(|c| c.index.as_ref()),
            IndexSlot::CompoundValue(i) => self.compound_value.get(i).map(|c| c.index.as_ref()),
        };
        found.ok_or_else(|| TableError::IndexNotFound(format!("{:?}", slot)))
    }

    /// Slot of the compound index over (`first`, `second`)
    pub(crate) fn compound_slot(&self, first: usize, second: usize) -> Option<IndexSlot> {
        self.compound
            .iter()
            .position(|c| c.first == first && c.second == second)
            .map(IndexSlot::Compound)
    }

    /// Slot of the compound-with-value index over (`first`, `second`, `value`)
    pub(crate) fn compound_value_slot(&self, first: usize, second: usize, value: usize) -> Option<IndexSlot> {
        self.compound_value
            .iter()
            .position(|c| c.first == first && c.second == second && c.value == value)
            .map(IndexSlot::CompoundValue)
    }

    /// Checks bounds, and alignment on fixed-size tables, before any read
    /// or write at `offset`.
    pub fn validate_offset(&self, offset: u64) -> TableResult<()> {
        let len = self.file.len();
        if offset >= len {
            return Err(TableError::bad_indexes(
                offset,
                format!("offset beyond end of file ({} bytes)", len),
            ));
        }
        if let Some(size) = self.schema.record_size() {
            if offset % size != 0 {
                return Err(TableError::bad_indexes(
                    offset,
                    format!("offset not aligned to record size {}", size),
                ));
            }
            if offset + size > len {
                return Err(TableError::bad_indexes(offset, "record extends past end of file"));
            }
        }
        Ok(())
    }

    /// Marker of the record at `offset`
    pub fn marker_at(&self, offset: u64) -> TableResult<RecordMarker> {
        self.validate_offset(offset)?;
        Ok(self.file.read_marker(offset)?)
    }

    /// Field values of the normal record at `offset`.
    pub fn read_values(&mut self, offset: u64) -> TableResult<Vec<ColumnValue>> {
        self.validate_offset(offset)?;
        match self.next_record(offset, false)? {
            super::scan::ScanStep::Loaded {
                marker: RecordMarker::Normal,
                values,
                ..
            } => Ok(values),
            super::scan::ScanStep::Loaded { marker, .. } => Err(TableError::bad_indexes(
                offset,
                format!("expected a normal record, found {}", marker),
            )),
            _ => Err(TableError::bad_indexes(offset, "no record at offset")),
        }
    }

    /// The record at `offset`
    pub fn load(&mut self, offset: u64) -> TableResult<Record> {
        let values = self.read_values(offset)?;
        Ok(Record::loaded(Arc::clone(&self.schema), offset, values))
    }

    /// A new, unsaved record with default values and the next identity
    pub fn new_record(&mut self) -> Record {
        let mut values = self.schema.default_values();
        if let Some(ordinal) = self.schema.identity() {
            values[ordinal] = ColumnValue::Int(self.allocate_id());
        }
        Record::new(Arc::clone(&self.schema), values)
    }

    /// Writes `new` as an insert (`offset` is `None`) or an update of the
    /// record at `offset`, whose previous values are `old` when known.
    ///
    /// Returns the record's offset after the write. An unchanged update on
    /// an update-capable table returns the existing offset without
    /// touching the file or any index.
    pub fn commit(&mut self, offset: Option<u64>, old: Option<&[ColumnValue]>, new: &[ColumnValue]) -> TableResult<u64> {
        self.schema.check_values(new)?;

        let Some(offset) = offset else {
            return self.insert(new);
        };

        if self.schema.can_update() {
            let previous = match old {
                Some(old) => old.to_vec(),
                None => self.read_values(offset)?,
            };
            let changed: Vec<bool> = previous.iter().zip(new).map(|(a, b)| !a.same_as(b)).collect();
            if !changed.contains(&true) {
                return Ok(offset);
            }

            self.validate_offset(offset)?;
            let marker = self.file.read_marker(offset)?;
            if marker != RecordMarker::Normal {
                return Err(TableError::bad_indexes(
                    offset,
                    format!("cannot update a {} record", marker),
                ));
            }
            self.mark_dirty()?;
            self.remove_values_from_index(offset, &previous, Some(new))?;
            let bytes = self.schema.encode(RecordMarker::Normal, new)?;
            self.file.write_at(offset, &bytes)?;
            self.add_values_to_index(offset, new, &changed)?;
            self.finish_write(bytes.len())?;
            Ok(offset)
        } else {
            // the old row stays live until the replacement is indexed
            let previous = self.read_values(offset)?;
            let moved = self.insert(new)?;
            self.remove_values_from_index(offset, &previous, None)?;
            self.file.write_marker(offset, RecordMarker::Deleted)?;
            if self.options.auto_flush {
                self.file.flush()?;
            }
            self.release_replaced_blobs(&previous, new);
            self.count = self.count.saturating_sub(1);
            Ok(moved)
        }
    }

    fn insert(&mut self, values: &[ColumnValue]) -> TableResult<u64> {
        self.mark_dirty()?;
        let bytes = self.schema.encode(RecordMarker::Normal, values)?;
        let offset = self.file.append(&bytes)?;
        let all = vec![true; values.len()];
        if let Err(e) = self.add_values_to_index(offset, values, &all) {
            self.abandon_insert(offset, values);
            return Err(e);
        }
        self.count += 1;
        self.finish_write(bytes.len())?;
        Ok(offset)
    }

    /// Takes back a half-indexed append: entries that made it in are
    /// removed and the record is tombstoned.
    fn abandon_insert(&mut self, offset: u64, values: &[ColumnValue]) {
        let undone = self
            .remove_values_from_index(offset, values, None)
            .and_then(|()| {
                self.file
                    .write_marker(offset, RecordMarker::Deleted)
                    .map_err(TableError::from)
            });
        if let Err(e) = undone {
            Logger::error(
                "TABLE_INSERT_ROLLBACK_FAILED",
                &[
                    ("table", &self.file.path().display().to_string()),
                    ("offset", &offset.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
    }

    fn finish_write(&mut self, bytes: usize) -> TableResult<()> {
        if self.options.auto_flush {
            self.file.flush()?;
        }
        self.metrics.add_saved(bytes as u64);
        self.metrics.increment_committed();
        Ok(())
    }

    /// Tombstones the normal record at `offset`.
    pub fn delete(&mut self, offset: u64) -> TableResult<()> {
        let values = self.read_values(offset)?;
        self.mark_dirty()?;
        self.remove_values_from_index(offset, &values, None)?;
        self.file.write_marker(offset, RecordMarker::Deleted)?;
        self.release_blobs(&values);
        if self.options.auto_flush {
            self.file.flush()?;
        }
        self.count = self.count.saturating_sub(1);
        self.metrics.increment_deleted();
        Ok(())
    }

    /// Adds entries for the record at `offset` to every index whose
    /// columns are flagged in `changed`.
    pub(crate) fn add_values_to_index(&mut self, offset: u64, values: &[ColumnValue], changed: &[bool]) -> TableResult<()> {
        let schema = Arc::clone(&self.schema);

        for (ordinal, slot) in self.simple.iter_mut().enumerate() {
            let Some(index) = slot else { continue };
            if !changed[ordinal] {
                continue;
            }
            if let Some(key) = schema.columns()[ordinal].key_for(&values[ordinal]) {
                index.add_entry(key, offset)?;
                self.metrics.increment_index_calls();
            }
        }

        for c in self.compound.iter_mut() {
            if !(changed[c.first] || changed[c.second]) {
                continue;
            }
            if let Some(key) = compound_key(&schema, c.first, c.second, values) {
                c.index.add_entry(key, offset)?;
                self.metrics.increment_index_calls();
            }
        }

        for c in self.compound_value.iter_mut() {
            if !(changed[c.first] || changed[c.second] || changed[c.value]) {
                continue;
            }
            if let Some(key) = compound_value_key(&schema, c.first, c.second, c.value, values) {
                c.index.add_entry(key, offset)?;
                self.metrics.increment_index_calls();
            }
        }
        Ok(())
    }

    /// Removes the entries `old` produced for the record at `offset`.
    ///
    /// With `new` present only indexes over changed columns are touched.
    /// String values are removed by their case-insensitive hash, the same
    /// key they were added under.
    pub(crate) fn remove_values_from_index(
        &mut self,
        offset: u64,
        old: &[ColumnValue],
        new: Option<&[ColumnValue]>,
    ) -> TableResult<()> {
        let schema = Arc::clone(&self.schema);
        let unchanged = |ordinal: usize| new.is_some_and(|n| n[ordinal].same_as(&old[ordinal]));
        let mut missing: Vec<String> = Vec::new();

        for (ordinal, slot) in self.simple.iter_mut().enumerate() {
            let Some(index) = slot else { continue };
            if unchanged(ordinal) {
                continue;
            }
            if let Some(key) = schema.columns()[ordinal].key_for(&old[ordinal]) {
                if !index.remove_entry(&key, offset)? {
                    missing.push(index.name().to_string());
                }
                self.metrics.increment_index_calls();
            }
        }

        for c in self.compound.iter_mut() {
            if unchanged(c.first) && unchanged(c.second) {
                continue;
            }
            if let Some(key) = compound_key(&schema, c.first, c.second, old) {
                if !c.index.remove_entry(&key, offset)? {
                    missing.push(c.index.name().to_string());
                }
                self.metrics.increment_index_calls();
            }
        }

        for c in self.compound_value.iter_mut() {
            if unchanged(c.first) && unchanged(c.second) && unchanged(c.value) {
                continue;
            }
            if let Some(key) = compound_value_key(&schema, c.first, c.second, c.value, old) {
                if !c.index.remove_entry(&key, offset)? {
                    missing.push(c.index.name().to_string());
                }
                self.metrics.increment_index_calls();
            }
        }

        for name in missing {
            Logger::warn(
                "TABLE_INDEX_ENTRY_MISSING",
                &[("index", &name), ("offset", &offset.to_string())],
            );
        }
        Ok(())
    }

    fn release_blobs(&mut self, values: &[ColumnValue]) {
        for value in values {
            if let ColumnValue::Blob(handle) = value {
                self.release_blob(*handle);
            }
        }
    }

    fn release_replaced_blobs(&mut self, previous: &[ColumnValue], new: &[ColumnValue]) {
        for (old, new) in previous.iter().zip(new) {
            if let ColumnValue::Blob(handle) = old {
                if !old.same_as(new) {
                    self.release_blob(*handle);
                }
            }
        }
    }

    fn release_blob(&mut self, handle: BlobHandle) {
        if handle.is_none() {
            return;
        }
        if let Err(e) = self.blobs.release(handle) {
            Logger::warn(
                "TABLE_BLOB_RELEASE_FAILED",
                &[("handle", &handle.to_string()), ("error", &e.to_string())],
            );
        }
    }

    /// Stores BLOB bytes and returns the handle to put in a BLOB column
    pub fn put_blob(&mut self, bytes: &[u8]) -> TableResult<BlobHandle> {
        Ok(self.blobs.put(bytes)?)
    }

    pub fn read_blob(&self, handle: BlobHandle) -> TableResult<Vec<u8>> {
        Ok(self.blobs.get(handle)?)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Opens every index with the table's normal cache options.
    pub fn open_indexes(&mut self) -> TableResult<()> {
        let options = self.index_open_options();
        self.open_indexes_with(&options)
    }

    pub(crate) fn open_indexes_with(&mut self, options: &IndexOpenOptions) -> TableResult<()> {
        for index in self.indexes_mut() {
            index.open(options)?;
        }
        Ok(())
    }

    pub(crate) fn clear_indexes(&mut self) -> TableResult<()> {
        for index in self.indexes_mut() {
            index.clear()?;
        }
        Ok(())
    }

    pub(crate) fn flush_indexes(&mut self) -> TableResult<()> {
        for index in self.indexes_mut() {
            index.flush()?;
        }
        Ok(())
    }

    /// Compacts every index. `idle` allows a thorough pass.
    pub fn defragment_indexes(&mut self, idle: bool) -> TableResult<()> {
        for index in self.indexes_mut() {
            index.defragment(idle)?;
        }
        Ok(())
    }

    /// First index whose entry count differs from the record count
    pub(crate) fn diverged_index(&self) -> Option<(String, u64)> {
        self.indexes()
            .into_iter()
            .find(|i| i.count() != self.count)
            .map(|i| (i.name().to_string(), i.count()))
    }

    fn write_meta(&self, clean: bool) -> TableResult<()> {
        TableMeta {
            version: META_VERSION,
            record_count: self.count,
            next_id: self.next_id,
            columns: self.schema.describe(),
            data_len: self.file.len(),
            clean,
        }
        .save(&self.meta_path)
    }

    /// Records that the data file, indexes and counters agree.
    /// Indexes must already be flushed.
    pub(crate) fn save_meta(&mut self) -> TableResult<()> {
        self.write_meta(true)?;
        self.meta_clean = true;
        Ok(())
    }

    /// Clears the clean flag on disk before the first write after a flush,
    /// so a crash before the next flush forces a rebuild at open.
    pub(crate) fn mark_dirty(&mut self) -> TableResult<()> {
        if self.meta_clean {
            self.write_meta(false)?;
            self.meta_clean = false;
        }
        Ok(())
    }

    pub(crate) fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Syncs the record file, flushes indexes and writes metadata.
    pub fn flush(&mut self) -> TableResult<()> {
        self.file.flush()?;
        self.flush_indexes()?;
        self.save_meta()
    }

    /// Flushes and shuts every index down. Idempotent.
    pub fn shutdown(&mut self) -> TableResult<()> {
        if self.closed {
            return Ok(());
        }
        self.file.flush()?;
        for index in self.indexes_mut() {
            index.shutdown()?;
        }
        self.save_meta()?;
        self.closed = true;
        Logger::info(
            "TABLE_SHUTDOWN",
            &[
                ("table", &self.file.path().display().to_string()),
                ("records", &self.count.to_string()),
            ],
        );
        Ok(())
    }

    pub(crate) fn take_offsets(&mut self) -> Vec<u64> {
        self.offset_pool.pop().unwrap_or_default()
    }

    pub(crate) fn recycle_offsets(&mut self, mut offsets: Vec<u64>) {
        offsets.clear();
        if self.offset_pool.len() < OFFSET_POOL_LIMIT {
            self.offset_pool.push(offsets);
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled_buffers(&self) -> usize {
        self.offset_pool.len()
    }
}

impl Drop for TableEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            Logger::error(
                "TABLE_SHUTDOWN_FAILED",
                &[
                    ("table", &self.file.path().display().to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
    }
}
