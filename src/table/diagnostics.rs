//! Read-only inspection: record dumps and integrity checks
//!
//! Neither operation repairs anything. A structural fault stops the walk
//! and is reported instead of propagated.

use std::collections::BTreeSet;
use std::io::Write;

use serde::Serialize;
use serde_json::json;

use crate::observability::ObservationScope;
use crate::storage::RecordMarker;

use super::engine::TableEngine;
use super::errors::TableResult;
use super::scan::ScanStep;

/// Dangling offsets reported per index at most
const MAX_DANGLING_PER_INDEX: usize = 16;

/// Where a walk stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFault {
    pub offset: u64,
    pub reason: String,
}

/// An index whose entry count differs from the live record count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMismatch {
    pub index: String,
    pub entries: u64,
    pub expected: u64,
}

/// An index entry pointing at something other than a normal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingEntry {
    pub index: String,
    pub offset: u64,
}

/// Result of [`TableEngine::check_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub records: u64,
    pub deleted: u64,
    pub corrupted: u64,
    pub bytes: u64,
    /// Live count held by the table
    pub table_count: u64,
    pub fault: Option<IntegrityFault>,
    pub index_mismatches: Vec<IndexMismatch>,
    pub dangling_entries: Vec<DanglingEntry>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.fault.is_none()
            && self.corrupted == 0
            && self.table_count == self.records
            && self.index_mismatches.is_empty()
            && self.dangling_entries.is_empty()
    }
}

impl TableEngine {
    /// Walks every record and cross-checks each index against the file.
    pub fn check_integrity(&mut self) -> TableResult<IntegrityReport> {
        let table = self.path().display().to_string();
        let scope = ObservationScope::begin("TABLE_CHECK", &[("table", &table)]);

        let mut report = IntegrityReport {
            bytes: self.file_len(),
            table_count: self.count,
            ..IntegrityReport::default()
        };
        let mut live = BTreeSet::new();
        let mut offset = 0;
        loop {
            let step = match self.next_record(offset, false) {
                Ok(step) => step,
                Err(e) if e.is_bad_indexes() => {
                    report.fault = Some(IntegrityFault {
                        offset,
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => {
                    scope.fail(&e.to_string());
                    return Err(e);
                }
            };
            let ScanStep::Loaded { marker, end, .. } = step else { break };
            match marker {
                RecordMarker::Normal => {
                    live.insert(offset);
                    report.records += 1;
                }
                RecordMarker::Deleted => report.deleted += 1,
                RecordMarker::Corrupted => report.corrupted += 1,
            }
            offset = end;
        }

        let mut offsets = self.take_offsets();
        for index in self.indexes() {
            if index.count() != report.records {
                report.index_mismatches.push(IndexMismatch {
                    index: index.name().to_string(),
                    entries: index.count(),
                    expected: report.records,
                });
            }
            offsets.clear();
            index.get_all_offsets(&mut offsets);
            report.dangling_entries.extend(
                offsets
                    .iter()
                    .filter(|o| !live.contains(*o))
                    .take(MAX_DANGLING_PER_INDEX)
                    .map(|&offset| DanglingEntry {
                        index: index.name().to_string(),
                        offset,
                    }),
            );
        }
        self.recycle_offsets(offsets);

        scope.complete(&[
            ("records", &report.records.to_string()),
            ("consistent", &report.is_consistent().to_string()),
        ]);
        Ok(report)
    }

    /// Writes one JSON line per physical record and returns how many were
    /// written. A fault ends the dump with an error line.
    pub fn dump<W: Write>(&mut self, out: &mut W) -> TableResult<u64> {
        let names: Vec<String> = self.schema.columns().iter().map(|c| c.name().to_string()).collect();
        let mut written = 0;
        let mut offset = 0;
        loop {
            match self.next_record(offset, false) {
                Ok(ScanStep::Loaded { marker, values, end }) => {
                    let fields: serde_json::Map<String, serde_json::Value> = names
                        .iter()
                        .cloned()
                        .zip(values.iter().map(|v| v.to_json()))
                        .collect();
                    let line = json!({
                        "offset": offset,
                        "marker": marker.to_string(),
                        "values": fields,
                    });
                    writeln!(out, "{}", line)?;
                    written += 1;
                    offset = end;
                }
                Ok(_) => break,
                Err(e) if e.is_bad_indexes() => {
                    writeln!(out, "{}", json!({ "offset": offset, "error": e.to_string() }))?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use crate::column::ColumnType;
    use crate::table::TableBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_clean_table_is_consistent() {
        let dir = TempDir::new().unwrap();
        let table = TableBuilder::new(dir.path().join("t.dat"))
            .column("id", ColumnType::Int)
            .index("id")
            .open()
            .unwrap();
        for i in 0..3 {
            let mut r = table.new_record();
            r.set("id", i).unwrap();
            table.commit(&mut r).unwrap();
        }
        let report = table.check_integrity().unwrap();
        assert!(report.is_consistent(), "{:?}", report);
        assert_eq!(report.records, 3);
    }

    #[test]
    fn test_dump_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let table = TableBuilder::new(dir.path().join("t.dat"))
            .column("id", ColumnType::Int)
            .column("name", ColumnType::String)
            .open()
            .unwrap();
        let mut r = table.new_record();
        r.set("id", 7).unwrap();
        r.set("name", "zed").unwrap();
        let offset = table.commit(&mut r).unwrap();
        table.delete_record(offset).unwrap();

        let mut out = Vec::new();
        assert_eq!(table.dump(&mut out).unwrap(), 1);
        let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["marker"], "DELETED");
        assert_eq!(line["values"]["name"], "zed");
    }

    #[test]
    fn test_fault_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let table = TableBuilder::new(dir.path().join("t.dat"))
            .column("id", ColumnType::Int)
            .open()
            .unwrap();
        let mut r = table.new_record();
        table.commit(&mut r).unwrap();
        table.lock().file.append(b"?").unwrap();

        let report = table.check_integrity().unwrap();
        assert_eq!(report.fault.as_ref().map(|f| f.offset), Some(5));
        assert!(!report.is_consistent());
    }
}
