//! Defragmentation Tests
//!
//! Tests for:
//! - Dead records are dropped and live content is preserved
//! - Sort-column tables come out in index order
//! - A failed pass leaves the data file untouched and no side file behind,
//!   including a failure while the compacted file is being put in place

use std::fs;

use aerotable::column::ColumnType;
use aerotable::index::{BTreeIndex, Index, IndexEntry, IndexEnumerator, IndexOpenOptions, IndexResult};
use aerotable::key::FixedLengthKey;
use aerotable::table::{Table, TableBuilder, TableDefragmentator};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

fn insert(table: &Table, id: i32, name: &str) -> u64 {
    let mut r = table.new_record();
    r.set("id", id).unwrap();
    r.set("name", name).unwrap();
    table.commit(&mut r).unwrap()
}

fn names_in_file_order(table: &Table) -> Vec<String> {
    let mut out = Vec::new();
    table.dump(&mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            v["values"]["name"].as_str().unwrap().to_string()
        })
        .collect()
}

/// Delegates to a real index but reports one offset that does not exist
struct LyingIndex {
    inner: BTreeIndex,
}

impl Index for LyingIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn key_template(&self) -> &FixedLengthKey {
        self.inner.key_template()
    }

    fn open(&mut self, options: &IndexOpenOptions) -> IndexResult<()> {
        self.inner.open(options)
    }

    fn flush(&mut self) -> IndexResult<()> {
        self.inner.flush()
    }

    fn shutdown(&mut self) -> IndexResult<()> {
        self.inner.shutdown()
    }

    fn clear(&mut self) -> IndexResult<()> {
        self.inner.clear()
    }

    fn defragment(&mut self, idle: bool) -> IndexResult<()> {
        self.inner.defragment(idle)
    }

    fn add_entry(&mut self, key: FixedLengthKey, offset: u64) -> IndexResult<()> {
        self.inner.add_entry(key, offset)
    }

    fn remove_entry(&mut self, key: &FixedLengthKey, offset: u64) -> IndexResult<bool> {
        self.inner.remove_entry(key, offset)
    }

    fn search_for_range(&self, low: &FixedLengthKey, high: &FixedLengthKey) -> IndexEnumerator {
        let bogus = IndexEntry {
            key: high.clone(),
            offset: 1 << 40,
        };
        Box::new(self.inner.search_for_range(low, high).chain(std::iter::once(bogus)))
    }

    fn count(&self) -> u64 {
        self.inner.count()
    }

    fn loaded_pages(&self) -> u64 {
        self.inner.loaded_pages()
    }

    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }
}

// =============================================================================
// Compaction
// =============================================================================

/// Tombstones disappear and every live record survives with its content.
#[test]
fn test_defragment_preserves_live_records() {
    let dir = create_temp_dir();
    let table = TableBuilder::new(dir.path().join("notes.dat"))
        .column("id", ColumnType::Int)
        .column("name", ColumnType::String)
        .index("id")
        .index("name")
        .open()
        .unwrap();

    let mut dead = Vec::new();
    for i in 0..20 {
        let offset = insert(&table, i, &format!("note {}", i));
        if i % 3 == 0 {
            dead.push(offset);
        }
    }
    for offset in dead {
        table.delete_record(offset).unwrap();
    }
    assert_eq!(names_in_file_order(&table).len(), 20);

    let report = table.defragment().unwrap();
    assert_eq!(report.records, 13);
    assert_eq!(report.rebuild.deleted, 0);
    assert!(report.bytes_after < report.bytes_before);
    assert_eq!(table.count(), 13);

    let names = names_in_file_order(&table);
    assert_eq!(names.len(), 13);
    assert!(!names.contains(&"note 0".to_string()));
    assert!(names.contains(&"note 19".to_string()));

    let mut rs = table.select("name", "NOTE 7").unwrap();
    assert!(rs.move_next());
    assert_eq!(rs.current().unwrap().get_int("id").unwrap(), 7);
    drop(rs);
    assert!(table.check_integrity().unwrap().is_consistent());
}

/// Defragmenting an empty table produces an empty file.
#[test]
fn test_defragment_empty_table() {
    let dir = create_temp_dir();
    let table = TableBuilder::new(dir.path().join("empty.dat"))
        .column("id", ColumnType::Int)
        .column("name", ColumnType::String)
        .index("id")
        .open()
        .unwrap();
    let report = table.defragment().unwrap();
    assert_eq!(report.records, 0);
    assert_eq!(table.file_len(), 0);
}

// =============================================================================
// Sort Order
// =============================================================================

/// With a sort column the new file follows that column's index order.
#[test]
fn test_sorted_defragment() {
    let dir = create_temp_dir();
    let table = TableBuilder::new(dir.path().join("sorted.dat"))
        .column("id", ColumnType::Int)
        .column("name", ColumnType::String)
        .index("id")
        .sort_column("id")
        .open()
        .unwrap();

    insert(&table, 3, "A");
    insert(&table, 1, "B");
    insert(&table, 2, "C");
    assert_eq!(names_in_file_order(&table), vec!["A", "B", "C"]);

    let report = table.defragment().unwrap();
    assert!(report.sorted);
    assert_eq!(names_in_file_order(&table), vec!["B", "C", "A"]);
}

// =============================================================================
// Failure
// =============================================================================

/// A bad offset from the sort index aborts the pass before the data file
/// is touched, and the side file is removed.
#[test]
fn test_failed_defragment_leaves_file_intact() {
    let dir = create_temp_dir();
    let path = dir.path().join("lying.dat");
    let lying = LyingIndex {
        inner: BTreeIndex::in_memory("id", FixedLengthKey::Int(0)),
    };
    let table = TableBuilder::new(&path)
        .column("id", ColumnType::Int)
        .column("name", ColumnType::String)
        .index_with("id", Box::new(lying))
        .sort_column("id")
        .open()
        .unwrap();

    insert(&table, 2, "x");
    insert(&table, 1, "y");
    table.flush().unwrap();
    let before = fs::read(&path).unwrap();

    let err = table.defragment().unwrap_err();
    assert_eq!(err.code(), "AERO_DEFRAGMENT_FAILED");

    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!TableDefragmentator::side_path(&path).exists());
    assert_eq!(table.count(), 2);
    assert_eq!(names_in_file_order(&table), vec!["x", "y"]);
}

/// When the data file cannot be moved aside, the pass fails with the data
/// file byte-identical and the table still usable.
#[test]
fn test_failed_replacement_keeps_data_file() {
    let dir = create_temp_dir();
    let path = dir.path().join("blocked.dat");
    let table = TableBuilder::new(&path)
        .column("id", ColumnType::Int)
        .column("name", ColumnType::String)
        .index("id")
        .open()
        .unwrap();

    let dead = insert(&table, 1, "x");
    insert(&table, 2, "y");
    table.delete_record(dead).unwrap();
    table.flush().unwrap();
    let before = fs::read(&path).unwrap();

    // a non-empty directory where the backup would go
    let backup = TableDefragmentator::backup_path(&path);
    fs::create_dir(&backup).unwrap();
    fs::write(backup.join("occupied"), b"1").unwrap();

    let err = table.defragment().unwrap_err();
    assert_eq!(err.code(), "AERO_DEFRAGMENT_FAILED");
    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!TableDefragmentator::side_path(&path).exists());

    insert(&table, 3, "z");
    assert_eq!(table.count(), 2);
    assert_eq!(names_in_file_order(&table), vec!["x", "y", "z"]);
    let mut rs = table.select("id", 3).unwrap();
    assert!(rs.move_next());
    assert_eq!(rs.current().unwrap().get_string("name").unwrap(), "z");
}
