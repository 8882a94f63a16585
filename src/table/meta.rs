//! Table metadata side file (`<data>.meta.json`)
//!
//! Holds what cannot be derived cheaply from the data file: the record
//! count, the next identity value and the schema the file was written with.
//! Written via temp file + rename.
//!
//! `clean` is cleared before the first write after a flush and set again
//! once the data file, indexes and metadata agree. A table that opens with
//! `clean == false`, or with a data file whose length differs from
//! `data_len`, was not shut down properly and is rebuilt.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::column::ColumnType;

use super::errors::{TableError, TableResult};

/// Current metadata format version
pub const META_VERSION: u32 = 1;

/// One column in the stored schema snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Persisted table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub version: u32,
    pub record_count: u64,
    pub next_id: i32,
    pub columns: Vec<ColumnMeta>,
    /// Data file length when this metadata was written
    #[serde(default)]
    pub data_len: u64,
    #[serde(default)]
    pub clean: bool,
}

impl TableMeta {
    /// Side file path for a data file
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut p = data_path.as_os_str().to_owned();
        p.push(".meta.json");
        PathBuf::from(p)
    }

    /// Loads metadata, or `None` if the file does not exist.
    pub fn load(path: &Path) -> TableResult<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: TableMeta = serde_json::from_str(&content)?;
        if meta.version != META_VERSION {
            return Err(TableError::Meta(format!(
                "unsupported metadata version {} (expected {})",
                meta.version, META_VERSION
            )));
        }
        Ok(Some(meta))
    }

    /// Writes metadata atomically.
    pub fn save(&self, path: &Path) -> TableResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// True if this metadata describes a data file of `file_len` bytes that
    /// was closed or flushed after its last write
    pub fn matches_file(&self, file_len: u64) -> bool {
        self.clean && self.data_len == file_len
    }

    /// Fails if the stored schema differs from the registered one.
    pub fn check_schema(&self, columns: &[ColumnMeta]) -> TableResult<()> {
        if self.columns == columns {
            return Ok(());
        }
        let describe = |cols: &[ColumnMeta]| {
            cols.iter()
                .map(|c| format!("{}:{}", c.name, c.column_type))
                .collect::<Vec<_>>()
                .join(",")
        };
        Err(TableError::InvalidSchema(format!(
            "registered columns [{}] do not match stored columns [{}]",
            describe(columns),
            describe(&self.columns)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> TableMeta {
        TableMeta {
            version: META_VERSION,
            record_count: 3,
            next_id: 4,
            columns: vec![ColumnMeta {
                name: "id".into(),
                column_type: ColumnType::Int,
            }],
            data_len: 26,
            clean: true,
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(TableMeta::load(&dir.path().join("x.meta.json")).unwrap(), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = TableMeta::path_for(&dir.path().join("t.dat"));
        assert!(path.to_string_lossy().ends_with("t.dat.meta.json"));
        sample().save(&path).unwrap();
        assert_eq!(TableMeta::load(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn test_schema_mismatch() {
        let meta = sample();
        let other = vec![ColumnMeta {
            name: "id".into(),
            column_type: ColumnType::Double,
        }];
        let err = meta.check_schema(&other).unwrap_err();
        assert_eq!(err.code(), "AERO_INVALID_SCHEMA");
        assert!(meta.check_schema(&sample().columns).is_ok());
    }

    #[test]
    fn test_dirty_or_resized_file_does_not_match() {
        let meta = sample();
        assert!(meta.matches_file(26));
        assert!(!meta.matches_file(39));
        let dirty = TableMeta { clean: false, ..sample() };
        assert!(!dirty.matches_file(26));
    }

    #[test]
    fn test_meta_without_clean_flag_is_dirty() {
        let json = r#"{"version":1,"record_count":0,"next_id":1,"columns":[]}"#;
        let meta: TableMeta = serde_json::from_str(json).unwrap();
        assert!(!meta.clean);
        assert!(!meta.matches_file(0));
    }

    #[test]
    fn test_garbage_is_meta_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.meta.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(TableMeta::load(&path).unwrap_err().code(), "AERO_META_ERROR");
    }
}
