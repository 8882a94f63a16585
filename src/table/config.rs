//! Table configuration file (JSON)
//!
//! ```json
//! {
//!   "data_path": "./people.dat",
//!   "columns": [
//!     { "name": "id", "type": "int", "indexed": true },
//!     { "name": "name", "type": "string", "indexed": true }
//!   ],
//!   "compound_indexes": [{ "first": "id", "second": "name" }],
//!   "identity_column": "id"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::column::ColumnType;

use super::builder::TableBuilder;
use super::errors::{TableError, TableResult};
use super::Table;

/// One column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Attach a simple index
    #[serde(default)]
    pub indexed: bool,
}

/// Two-column index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundIndexConfig {
    pub first: String,
    pub second: String,
}

/// Two-column index carrying a third column's value in its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundValueIndexConfig {
    pub first: String,
    pub second: String,
    pub value: String,
}

/// Table configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Record file path (required). Relative paths resolve against the
    /// config file's directory.
    pub data_path: PathBuf,

    /// Columns in schema order (required, non-empty)
    pub columns: Vec<ColumnConfig>,

    #[serde(default)]
    pub compound_indexes: Vec<CompoundIndexConfig>,

    #[serde(default)]
    pub compound_value_indexes: Vec<CompoundValueIndexConfig>,

    /// Int column whose values come from the identity counter
    #[serde(default)]
    pub identity_column: Option<String>,

    /// Indexed column whose order defragment preserves
    #[serde(default)]
    pub sort_column: Option<String>,

    #[serde(flatten)]
    pub options: TableOptions,
}

/// Runtime tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Sync the record file after every commit and delete (default: true)
    #[serde(default = "default_true")]
    pub auto_flush: bool,

    /// Index cache size in pages (default: 64)
    #[serde(default = "default_cache_pages")]
    pub index_cache_pages: usize,

    /// Cache multiplier applied during rebuild and defragment (default: 8)
    #[serde(default = "default_rebuild_multiplier")]
    pub rebuild_cache_multiplier: usize,

    /// Rebuild at open when an index count diverges from the record count
    /// instead of failing (default: true)
    #[serde(default = "default_true")]
    pub rebuild_on_divergence: bool,

    /// Persist indexes to side files next to the data file (default: true)
    #[serde(default = "default_true")]
    pub persist_indexes: bool,
}

fn default_true() -> bool {
    true
}
fn default_cache_pages() -> usize {
    64
}
fn default_rebuild_multiplier() -> usize {
    8
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            auto_flush: true,
            index_cache_pages: default_cache_pages(),
            rebuild_cache_multiplier: default_rebuild_multiplier(),
            rebuild_on_divergence: true,
            persist_indexes: true,
        }
    }
}

impl TableConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> TableResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TableError::InvalidSchema(format!("failed to read config {}: {}", path.display(), e))
        })?;

        let mut config: TableConfig = serde_json::from_str(&content)
            .map_err(|e| TableError::InvalidSchema(format!("invalid config JSON: {}", e)))?;

        if config.data_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.data_path = dir.join(&config.data_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate option ranges. Column and index references are checked by
    /// the builder.
    pub fn validate(&self) -> TableResult<()> {
        if self.columns.is_empty() {
            return Err(TableError::InvalidSchema("at least one column is required".into()));
        }
        if self.options.index_cache_pages == 0 {
            return Err(TableError::InvalidSchema("index_cache_pages must be > 0".into()));
        }
        if self.options.rebuild_cache_multiplier == 0 {
            return Err(TableError::InvalidSchema("rebuild_cache_multiplier must be > 0".into()));
        }
        Ok(())
    }

    /// A builder with every column and index of this configuration registered
    pub fn builder(&self) -> TableBuilder {
        let mut builder = TableBuilder::new(&self.data_path).options(self.options);
        for column in &self.columns {
            builder = builder.column(&column.name, column.column_type);
        }
        for column in self.columns.iter().filter(|c| c.indexed) {
            builder = builder.index(&column.name);
        }
        for c in &self.compound_indexes {
            builder = builder.compound_index(&c.first, &c.second);
        }
        for c in &self.compound_value_indexes {
            builder = builder.compound_value_index(&c.first, &c.second, &c.value);
        }
        if let Some(identity) = &self.identity_column {
            builder = builder.identity(identity);
        }
        if let Some(sort) = &self.sort_column {
            builder = builder.sort_column(sort);
        }
        builder
    }

    /// Opens the table described by this configuration
    pub fn open(&self) -> TableResult<Table> {
        self.builder().open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "data_path": "people.dat",
        "columns": [
            { "name": "id", "type": "int", "indexed": true },
            { "name": "name", "type": "string" }
        ],
        "compound_indexes": [{ "first": "id", "second": "name" }],
        "identity_column": "id",
        "auto_flush": false
    }"#;

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.json");
        fs::write(&path, SAMPLE).unwrap();

        let config = TableConfig::load(&path).unwrap();
        assert_eq!(config.data_path, dir.path().join("people.dat"));
        assert_eq!(config.columns.len(), 2);
        assert!(config.columns[0].indexed);
        assert!(!config.options.auto_flush);
        assert_eq!(config.options.index_cache_pages, 64);
        assert_eq!(config.options.rebuild_cache_multiplier, 8);
        assert!(config.options.rebuild_on_divergence);
        assert_eq!(config.identity_column.as_deref(), Some("id"));
    }

    #[test]
    fn test_rejects_empty_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.json");
        fs::write(&path, r#"{ "data_path": "t.dat", "columns": [] }"#).unwrap();
        assert_eq!(TableConfig::load(&path).unwrap_err().code(), "AERO_INVALID_SCHEMA");
    }

    #[test]
    fn test_rejects_unknown_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.json");
        fs::write(&path, r#"{ "data_path": "t.dat", "columns": [{ "name": "a", "type": "uuid" }] }"#).unwrap();
        assert!(TableConfig::load(&path).is_err());
    }

    #[test]
    fn test_open_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.json");
        fs::write(&path, SAMPLE).unwrap();

        let table = TableConfig::load(&path).unwrap().open().unwrap();
        assert_eq!(table.count(), 0);
        assert_eq!(table.schema().len(), 2);
    }
}
