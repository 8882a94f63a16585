//! Record decoding with optional repair
//!
//! `load_record` decodes the record at an offset. Without fix mode every
//! structural fault is `BadIndexes`. With fix mode the scanner repairs what
//! it can and tells the caller how to continue:
//!
//! - Unknown marker, or end of file mid-record: truncate at the record start
//! - Malformed timestamp: overwrite the field with zero ticks, restart
//! - String length without a matching end marker: put the marker back where
//!   the length says if the record then lines up with the next one, else
//!   search forward for a marker that does not swallow another record and
//!   patch the length; truncate if neither works
//! - String content that is not UTF-8: mark the record corrupted; once
//!   marked, the record loads as corrupted in either mode
//!
//! Every repair logs a WARN event and counts in the repairs metric.

use std::io::{self, Read};

use crate::column::{ColumnValue, LoadError, STRING_END_MARKER};
use crate::observability::Logger;
use crate::storage::{RecordFile, RecordMarker, StorageResult};

use super::engine::TableEngine;
use super::errors::{TableError, TableResult};
use super::schema::TableSchema;

/// Outcome of decoding one record
#[derive(Debug)]
pub(crate) enum ScanStep {
    /// A complete record; the next one starts at `end`
    Loaded {
        marker: RecordMarker,
        values: Vec<ColumnValue>,
        end: u64,
    },
    /// The record was patched in place and must be decoded again
    Restart,
    /// The file was cut at the record start
    Truncated,
    /// No bytes at the offset
    EndOfFile,
}

enum Decoded {
    Record {
        marker: RecordMarker,
        values: Vec<ColumnValue>,
        end: u64,
        invalid_utf8: Option<String>,
    },
    UnknownMarker(u8),
    Fault {
        ordinal: usize,
        field_start: u64,
        error: LoadError,
    },
}

fn decode(schema: &TableSchema, file: &RecordFile, offset: u64) -> StorageResult<Decoded> {
    let len = file.len();
    let mut reader = file.reader_at(offset)?;

    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let Some(marker) = RecordMarker::from_byte(byte[0]) else {
        return Ok(Decoded::UnknownMarker(byte[0]));
    };

    let mut values = Vec::with_capacity(schema.len());
    let mut invalid_utf8 = None;
    for column in schema.columns() {
        let field_start = reader.position();
        match column.load_value(&mut reader, len.saturating_sub(field_start)) {
            Ok(value) => values.push(value),
            Err(LoadError::InvalidUtf8 { lossy }) => {
                invalid_utf8.get_or_insert_with(|| column.name().to_string());
                values.push(ColumnValue::String(lossy));
            }
            Err(error) => {
                return Ok(Decoded::Fault {
                    ordinal: column.ordinal(),
                    field_start,
                    error,
                })
            }
        }
    }

    Ok(Decoded::Record {
        marker,
        values,
        end: reader.position(),
        invalid_utf8,
    })
}

fn record_starts_at(schema: &TableSchema, file: &RecordFile, offset: u64) -> StorageResult<bool> {
    if offset >= file.len() {
        return Ok(false);
    }
    Ok(matches!(decode(schema, file, offset)?, Decoded::Record { .. }))
}

impl TableEngine {
    /// Decodes the record at `offset`, retrying after in-place repairs.
    pub(crate) fn next_record(&mut self, offset: u64, fix: bool) -> TableResult<ScanStep> {
        let attempts = self.schema.len() * 2 + 2;
        for _ in 0..attempts {
            match self.load_record(offset, fix)? {
                ScanStep::Restart => continue,
                step => return Ok(step),
            }
        }
        self.truncate_at(offset, "record still malformed after repairs")?;
        Ok(ScanStep::Truncated)
    }

    /// Decodes the record at `offset` once.
    pub(crate) fn load_record(&mut self, offset: u64, fix: bool) -> TableResult<ScanStep> {
        if offset >= self.file.len() {
            return Ok(ScanStep::EndOfFile);
        }

        match decode(&self.schema, &self.file, offset)? {
            Decoded::Record {
                marker,
                values,
                end,
                invalid_utf8,
            } => {
                self.metrics.add_loaded(end - offset);
                let Some(column) = invalid_utf8.filter(|_| marker != RecordMarker::Corrupted) else {
                    return Ok(ScanStep::Loaded { marker, values, end });
                };
                if !fix {
                    return Err(TableError::bad_indexes(
                        offset,
                        format!("column '{}': string content is not valid UTF-8", column),
                    ));
                }
                self.file.write_marker(offset, RecordMarker::Corrupted)?;
                self.note_repair("TABLE_RECORD_QUARANTINED", offset, &[("column", &column)]);
                Ok(ScanStep::Loaded {
                    marker: RecordMarker::Corrupted,
                    values,
                    end,
                })
            }
            Decoded::UnknownMarker(byte) => {
                let reason = format!("unexpected marker byte 0x{:02x}", byte);
                if !fix {
                    return Err(TableError::bad_indexes(offset, reason));
                }
                self.truncate_at(offset, &reason)?;
                Ok(ScanStep::Truncated)
            }
            Decoded::Fault {
                ordinal,
                field_start,
                error,
            } => self.repair_field(offset, ordinal, field_start, error, fix),
        }
    }

    fn repair_field(
        &mut self,
        offset: u64,
        ordinal: usize,
        field_start: u64,
        error: LoadError,
        fix: bool,
    ) -> TableResult<ScanStep> {
        let column = self.schema.columns()[ordinal].name().to_string();
        let reason = format!("column '{}': {}", column, error);
        let error = match error {
            LoadError::Io(e) if e.kind() != io::ErrorKind::UnexpectedEof => return Err(TableError::Io(e)),
            other => other,
        };
        if !fix {
            return Err(TableError::bad_indexes(offset, reason));
        }

        match error {
            LoadError::BadTimestamp { ticks } => {
                self.file.write_at(field_start, &0i64.to_le_bytes())?;
                self.note_repair(
                    "TABLE_TIMESTAMP_REPAIRED",
                    offset,
                    &[("column", &column), ("ticks", &ticks.to_string())],
                );
                Ok(ScanStep::Restart)
            }
            LoadError::StringTooLong { length, .. } | LoadError::MissingEndMarker { length } => {
                let content_start = field_start + 4;
                if self.restore_end_marker(offset, content_start + u64::from(length))? {
                    self.note_repair(
                        "TABLE_STRING_REPAIRED",
                        offset,
                        &[
                            ("column", &column),
                            ("strategy", "end_marker"),
                            ("length", &length.to_string()),
                        ],
                    );
                    return Ok(ScanStep::Restart);
                }
                match self.end_marker_by_search(content_start)? {
                    Some(patched) => {
                        self.file.write_at(field_start, &patched.to_le_bytes())?;
                        self.note_repair(
                            "TABLE_STRING_REPAIRED",
                            offset,
                            &[
                                ("column", &column),
                                ("strategy", "length"),
                                ("old_length", &length.to_string()),
                                ("new_length", &patched.to_string()),
                            ],
                        );
                        Ok(ScanStep::Restart)
                    }
                    None => {
                        self.truncate_at(offset, &reason)?;
                        Ok(ScanStep::Truncated)
                    }
                }
            }
            LoadError::Io(_) | LoadError::InvalidUtf8 { .. } => {
                self.truncate_at(offset, &reason)?;
                Ok(ScanStep::Truncated)
            }
        }
    }

    /// Rewrites the string end marker where the declared length puts it.
    ///
    /// The write is kept only if the record then decodes and is followed by
    /// end of file or another decodable record; otherwise the original bytes
    /// go back.
    fn restore_end_marker(&mut self, offset: u64, declared_end: u64) -> TableResult<bool> {
        let len = self.file.len();
        if declared_end + STRING_END_MARKER.len() as u64 > len {
            return Ok(false);
        }
        let mut original = [0u8; 4];
        self.file.read_at(declared_end, &mut original)?;
        self.file.write_at(declared_end, &STRING_END_MARKER)?;

        let fits = match decode(&self.schema, &self.file, offset)? {
            Decoded::Record { end, .. } => end == len || record_starts_at(&self.schema, &self.file, end)?,
            _ => false,
        };
        if !fits {
            self.file.write_at(declared_end, &original)?;
        }
        Ok(fits)
    }

    /// Length implied by the next end marker after `content_start`, unless
    /// the bytes in between hold the start of another decodable record.
    fn end_marker_by_search(&self, content_start: u64) -> TableResult<Option<u32>> {
        let Some(found) = self.file.find_pattern(content_start, &STRING_END_MARKER)? else {
            return Ok(None);
        };
        let Ok(span) = u32::try_from(found - content_start) else {
            return Ok(None);
        };
        let mut content = vec![0u8; span as usize];
        self.file.read_at(content_start, &mut content)?;
        for (i, byte) in content.iter().enumerate() {
            if RecordMarker::from_byte(*byte).is_some()
                && record_starts_at(&self.schema, &self.file, content_start + i as u64)?
            {
                return Ok(None);
            }
        }
        Ok(Some(span))
    }

    /// Cuts the file at `offset`, the end of the last good record.
    pub(crate) fn truncate_at(&mut self, offset: u64, reason: &str) -> TableResult<()> {
        let dropped = self.file.len().saturating_sub(offset);
        self.file.truncate(offset)?;
        self.note_repair(
            "TABLE_TRUNCATED",
            offset,
            &[("reason", reason), ("bytes_dropped", &dropped.to_string())],
        );
        Ok(())
    }

    fn note_repair(&self, event: &str, offset: u64, fields: &[(&str, &str)]) {
        self.metrics.increment_repairs();
        let table = self.file.path().display().to_string();
        let offset = offset.to_string();
        let mut all: Vec<(&str, &str)> = vec![("table", &table), ("offset", &offset)];
        all.extend_from_slice(fields);
        Logger::warn(event, &all);
    }
}

#[cfg(test)]
mod tests {
    use crate::column::{ColumnType, ColumnValue};
    use crate::storage::RecordMarker;
    use crate::table::scan::ScanStep;
    use crate::table::{Table, TableBuilder};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Table {
        TableBuilder::new(dir.path().join("people.dat"))
            .column("id", ColumnType::Int)
            .column("name", ColumnType::String)
            .index("id")
            .open()
            .unwrap()
    }

    fn insert(table: &Table, id: i32, name: &str) -> u64 {
        let mut record = table.new_record();
        record.set("id", id).unwrap();
        record.set("name", name).unwrap();
        table.commit(&mut record).unwrap()
    }

    #[test]
    fn test_clean_record_loads() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir);
        let offset = insert(&table, 1, "ann");

        let mut engine = table.lock();
        match engine.next_record(offset, false).unwrap() {
            ScanStep::Loaded { marker, values, end } => {
                assert_eq!(marker, RecordMarker::Normal);
                assert_eq!(values[1], ColumnValue::from("ann"));
                assert_eq!(end, engine.file_len());
            }
            other => panic!("unexpected step {:?}", other),
        }
        let len = engine.file_len();
        assert!(matches!(engine.next_record(len, false).unwrap(), ScanStep::EndOfFile));
    }

    #[test]
    fn test_unknown_marker_strict_and_fixed() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir);
        insert(&table, 1, "ann");
        let second = insert(&table, 2, "bob");

        let mut engine = table.lock();
        engine.file.write_at(second, b"?").unwrap();

        let err = engine.next_record(second, false).unwrap_err();
        assert!(err.is_bad_indexes());

        let repairs = engine.metrics().snapshot().repairs;
        assert!(matches!(engine.next_record(second, true).unwrap(), ScanStep::Truncated));
        assert_eq!(engine.file_len(), second);
        assert_eq!(engine.metrics().snapshot().repairs, repairs + 1);
    }

    #[test]
    fn test_shortened_string_length_is_patched() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir);
        let offset = insert(&table, 1, "abcdef");
        let next = insert(&table, 2, "gh");

        let mut engine = table.lock();
        // marker(1) + id(4) puts the string length at offset + 5
        engine.file.write_at(offset + 5, &3u32.to_le_bytes()).unwrap();

        match engine.next_record(offset, true).unwrap() {
            ScanStep::Loaded { values, end, .. } => {
                assert_eq!(values[1], ColumnValue::from("abcdef"));
                assert_eq!(end, next);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir);
        let offset = insert(&table, 1, "ab");

        let mut engine = table.lock();
        // content starts after marker, id and length
        engine.file.write_at(offset + 9, &[0xC3, 0x28]).unwrap();

        assert!(engine.next_record(offset, false).unwrap_err().is_bad_indexes());
        match engine.next_record(offset, true).unwrap() {
            ScanStep::Loaded { marker, .. } => assert_eq!(marker, RecordMarker::Corrupted),
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(engine.marker_at(offset).unwrap(), RecordMarker::Corrupted);
        match engine.next_record(offset, false).unwrap() {
            ScanStep::Loaded { marker, .. } => assert_eq!(marker, RecordMarker::Corrupted),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_missing_end_marker_restored_at_declared_length() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir);
        let first = insert(&table, 1, "abcdef");
        let second = insert(&table, 2, "gh");

        let mut engine = table.lock();
        // marker, id, length, six bytes of content, then the end marker
        engine.file.write_at(first + 15, &[0, 0, 0, 0]).unwrap();

        match engine.next_record(first, true).unwrap() {
            ScanStep::Loaded { values, end, .. } => {
                assert_eq!(values[1], ColumnValue::from("abcdef"));
                assert_eq!(end, second);
            }
            other => panic!("unexpected step {:?}", other),
        }
        match engine.next_record(second, false).unwrap() {
            ScanStep::Loaded { values, .. } => assert_eq!(values[0], ColumnValue::Int(2)),
            other => panic!("unexpected step {:?}", other),
        }
    }
}
