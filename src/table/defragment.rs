//! Table defragmentation
//!
//! Copies every normal record into `<data>.defrag`, dropping tombstones
//! and corrupted records, then replaces the data file and rebuilds all
//! indexes. With a sort column the records are written in that column's
//! index order; otherwise in file order.
//!
//! Any failure before the replacement removes the side file and leaves the
//! data file and indexes untouched. The replacement moves the data file to
//! `<data>.bak` first and moves it back if the new file cannot be put in
//! place. The side file is only deleted once the data file is whole again.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::observability::{Logger, ObservationScope};
use crate::storage::{RecordFile, RecordMarker};

use super::engine::{IndexSlot, TableEngine};
use super::errors::{TableError, TableResult};
use super::rebuild::{RebuildReport, TableRebuilder};
use super::scan::ScanStep;

/// What a defragment pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefragmentReport {
    /// Records copied into the new file
    pub records: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// True when records were written in sort-column order
    pub sorted: bool,
    pub rebuild: RebuildReport,
}

/// Rewrites one table's data file without dead space
pub struct TableDefragmentator<'a> {
    engine: &'a mut TableEngine,
}

impl<'a> TableDefragmentator<'a> {
    pub fn new(engine: &'a mut TableEngine) -> Self {
        Self { engine }
    }

    /// Side file the compacted records are written to
    pub fn side_path(data_path: &Path) -> PathBuf {
        let mut p = data_path.as_os_str().to_owned();
        p.push(".defrag");
        PathBuf::from(p)
    }

    /// Where the data file waits while the compacted copy is put in place
    pub fn backup_path(data_path: &Path) -> PathBuf {
        let mut p = data_path.as_os_str().to_owned();
        p.push(".bak");
        PathBuf::from(p)
    }

    pub fn run(mut self) -> TableResult<DefragmentReport> {
        let table = self.engine.path().display().to_string();
        let scope = ObservationScope::begin("TABLE_DEFRAGMENT", &[("table", &table)]);
        let side = Self::side_path(self.engine.path());
        let bytes_before = self.engine.file_len();
        let sorted = self.engine.schema.sort_column().is_some();

        let records = match self.compact(&side) {
            Ok(records) => records,
            Err(e) => {
                if side.exists() {
                    let _ = fs::remove_file(&side);
                }
                scope.fail(&e.to_string());
                return Err(TableError::DefragmentFailed { source: Box::new(e) });
            }
        };
        if let Err(e) = self.replace(&side) {
            scope.fail(&e.to_string());
            return Err(TableError::DefragmentFailed { source: Box::new(e) });
        }

        let rebuild = TableRebuilder::new(self.engine, false).run()?;
        let report = DefragmentReport {
            records,
            bytes_before,
            bytes_after: self.engine.file_len(),
            sorted,
            rebuild,
        };
        scope.complete(&[
            ("records", &report.records.to_string()),
            ("bytes_before", &report.bytes_before.to_string()),
            ("bytes_after", &report.bytes_after.to_string()),
        ]);
        Ok(report)
    }

    fn compact(&mut self, side: &Path) -> TableResult<u64> {
        let mut writer = BufWriter::new(File::create(side)?);
        let mut records = 0;

        if let Some(ordinal) = self.engine.schema.sort_column() {
            let mut offsets = self.engine.take_offsets();
            self.engine
                .index_for(IndexSlot::Simple(ordinal))?
                .get_all_offsets(&mut offsets);
            for &offset in &offsets {
                let values = self.engine.read_values(offset)?;
                writer.write_all(&self.engine.schema.encode(RecordMarker::Normal, &values)?)?;
                records += 1;
            }
            self.engine.recycle_offsets(offsets);
        } else {
            let mut offset = 0;
            loop {
                match self.engine.next_record(offset, true)? {
                    ScanStep::Loaded {
                        marker: RecordMarker::Normal,
                        values,
                        end,
                    } => {
                        writer.write_all(&self.engine.schema.encode(RecordMarker::Normal, &values)?)?;
                        records += 1;
                        offset = end;
                    }
                    ScanStep::Loaded { end, .. } => offset = end,
                    _ => break,
                }
            }
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(records)
    }

    fn replace(&mut self, side: &Path) -> TableResult<()> {
        let target = self.engine.path().to_path_buf();
        self.engine.mark_dirty()?;
        install(side, &target, &Self::backup_path(&target))?;
        self.engine.file = RecordFile::open(&target)?;
        Ok(())
    }
}

/// Puts `side` in place of `target`, keeping `target` at `backup` until the
/// new file is complete.
///
/// On error `target` holds its original bytes again and `side` is gone,
/// unless moving the backup back failed; then both are left for recovery.
fn install(side: &Path, target: &Path, backup: &Path) -> io::Result<()> {
    let table = target.display().to_string();
    if let Err(e) = fs::rename(target, backup) {
        let _ = fs::remove_file(side);
        return Err(e);
    }

    let placed = fs::copy(side, target).map(|_| ()).or_else(|e| {
        Logger::warn(
            "TABLE_DEFRAGMENT_COPY_FAILED",
            &[("table", &table), ("error", &e.to_string())],
        );
        fs::rename(side, target)
    });

    if let Err(e) = placed {
        if target.exists() {
            let _ = fs::remove_file(target);
        }
        if let Err(restore) = fs::rename(backup, target) {
            Logger::error(
                "TABLE_DEFRAGMENT_RESTORE_FAILED",
                &[
                    ("table", &table),
                    ("backup", &backup.display().to_string()),
                    ("error", &restore.to_string()),
                ],
            );
            return Err(e);
        }
        let _ = fs::remove_file(side);
        return Err(e);
    }

    for leftover in [side, backup] {
        if leftover.exists() {
            if let Err(e) = fs::remove_file(leftover) {
                Logger::warn(
                    "TABLE_DEFRAGMENT_CLEANUP_FAILED",
                    &[
                        ("table", &table),
                        ("path", &leftover.display().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::table::{Table, TableBuilder};
    use tempfile::TempDir;

    fn open(dir: &TempDir, sorted: bool) -> Table {
        let mut builder = TableBuilder::new(dir.path().join("t.dat"))
            .column("id", ColumnType::Int)
            .column("name", ColumnType::String)
            .index("id");
        if sorted {
            builder = builder.sort_column("id");
        }
        builder.open().unwrap()
    }

    fn insert(table: &Table, id: i32, name: &str) -> u64 {
        let mut r = table.new_record();
        r.set("id", id).unwrap();
        r.set("name", name).unwrap();
        table.commit(&mut r).unwrap()
    }

    #[test]
    fn test_defragment_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir, false);
        insert(&table, 1, "a");
        let dead = insert(&table, 2, "b");
        insert(&table, 3, "c");
        table.delete_record(dead).unwrap();

        let report = table.defragment().unwrap();
        assert_eq!(report.records, 2);
        assert!(report.bytes_after < report.bytes_before);
        assert!(!report.sorted);
        assert_eq!(table.count(), 2);
        assert!(!TableDefragmentator::side_path(table.path()).exists());
    }

    #[test]
    fn test_sorted_defragment_orders_by_index() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir, true);
        insert(&table, 3, "c");
        insert(&table, 1, "a");
        insert(&table, 2, "b");

        assert!(table.defragment().unwrap().sorted);

        let mut engine = table.lock();
        let mut offset = 0;
        let mut ids = Vec::new();
        while let ScanStep::Loaded { values, end, .. } = engine.next_record(offset, false).unwrap() {
            ids.push(values[0].as_int().unwrap());
            offset = end;
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_install_replaces_target() {
        let dir = TempDir::new().unwrap();
        let (side, target, backup) = (dir.path().join("s"), dir.path().join("t"), dir.path().join("b"));
        fs::write(&side, b"compact").unwrap();
        fs::write(&target, b"original bytes").unwrap();

        install(&side, &target, &backup).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"compact");
        assert!(!side.exists());
        assert!(!backup.exists());
    }

    #[test]
    fn test_failed_install_restores_target() {
        let dir = TempDir::new().unwrap();
        let (side, target, backup) = (dir.path().join("s"), dir.path().join("t"), dir.path().join("b"));
        fs::write(&target, b"original bytes").unwrap();

        // no side file: both the copy and the rename fallback fail
        assert!(install(&side, &target, &backup).is_err());
        assert_eq!(fs::read(&target).unwrap(), b"original bytes");
        assert!(!backup.exists());
    }
}
