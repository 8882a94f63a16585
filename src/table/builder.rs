//! Table registration and open
//!
//! Columns and indexes are registered by name, validated together, and
//! the table is opened in one step:
//!
//! 1. Load `<data>.meta.json` and check it against the registered columns
//! 2. Open every index and compare its entry count with the record count
//! 3. Rebuild when the counts diverge or metadata is missing for a
//!    non-empty file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blob::{BlobStore, MemoryBlobStore};
use crate::column::{Column, ColumnType};
use crate::index::{BTreeIndex, Index};
use crate::key::FixedLengthKey;
use crate::observability::{Logger, TableMetrics};
use crate::storage::RecordFile;

use super::config::TableOptions;
use super::engine::{CompoundIndex, CompoundValueIndex, TableEngine};
use super::errors::{TableError, TableResult};
use super::guard::EngineLock;
use super::meta::TableMeta;
use super::rebuild::TableRebuilder;
use super::schema::TableSchema;
use super::Table;

struct SimpleSpec {
    column: String,
    index: Option<Box<dyn Index>>,
}

struct CompoundSpec {
    columns: Vec<String>,
    index: Option<Box<dyn Index>>,
}

/// Collects a table definition and opens it
pub struct TableBuilder {
    path: PathBuf,
    columns: Vec<(String, ColumnType)>,
    simple: Vec<SimpleSpec>,
    compound: Vec<CompoundSpec>,
    compound_value: Vec<CompoundSpec>,
    identity: Option<String>,
    sort_column: Option<String>,
    options: TableOptions,
    blobs: Option<Box<dyn BlobStore>>,
}

impl TableBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            columns: Vec::new(),
            simple: Vec::new(),
            compound: Vec::new(),
            compound_value: Vec::new(),
            identity: None,
            sort_column: None,
            options: TableOptions::default(),
            blobs: None,
        }
    }

    /// Appends a column; ordinals follow registration order
    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push((name.to_string(), column_type));
        self
    }

    /// Attaches a simple index to `column`
    pub fn index(mut self, column: &str) -> Self {
        self.simple.push(SimpleSpec {
            column: column.to_string(),
            index: None,
        });
        self
    }

    /// Attaches a caller-supplied index implementation to `column`
    pub fn index_with(mut self, column: &str, index: Box<dyn Index>) -> Self {
        self.simple.push(SimpleSpec {
            column: column.to_string(),
            index: Some(index),
        });
        self
    }

    pub fn compound_index(mut self, first: &str, second: &str) -> Self {
        self.compound.push(CompoundSpec {
            columns: vec![first.to_string(), second.to_string()],
            index: None,
        });
        self
    }

    /// Index over (`first`, `second`) whose key also carries `value`
    pub fn compound_value_index(mut self, first: &str, second: &str, value: &str) -> Self {
        self.compound_value.push(CompoundSpec {
            columns: vec![first.to_string(), second.to_string(), value.to_string()],
            index: None,
        });
        self
    }

    /// Int column filled from the identity counter by `new_record`
    pub fn identity(mut self, column: &str) -> Self {
        self.identity = Some(column.to_string());
        self
    }

    /// Indexed column whose order defragment preserves
    pub fn sort_column(mut self, column: &str) -> Self {
        self.sort_column = Some(column.to_string());
        self
    }

    pub fn options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.options.auto_flush = enabled;
        self
    }

    /// Replaces the default in-memory BLOB store
    pub fn blob_store(mut self, store: Box<dyn BlobStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    fn index_path(&self, name: &str) -> PathBuf {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
            .collect();
        let mut p = self.path.as_os_str().to_owned();
        p.push(format!(".{}.idx", sanitized));
        PathBuf::from(p)
    }

    fn make_index(&self, name: &str, template: FixedLengthKey, supplied: Option<Box<dyn Index>>) -> TableResult<Box<dyn Index>> {
        match supplied {
            Some(index) if index.key_template().same_shape(&template) => Ok(index),
            Some(index) => Err(TableError::InvalidSchema(format!(
                "index '{}' stores {} keys, column needs {}",
                index.name(),
                index.key_template(),
                template
            ))),
            None if self.options.persist_indexes => Ok(Box::new(BTreeIndex::persistent(
                name,
                template,
                &self.index_path(name),
            ))),
            None => Ok(Box::new(BTreeIndex::in_memory(name, template))),
        }
    }

    /// Validates the definition and opens the table.
    pub fn open(mut self) -> TableResult<Table> {
        if self.columns.is_empty() {
            return Err(TableError::InvalidSchema("at least one column is required".into()));
        }
        let mut columns: Vec<Column> = Vec::with_capacity(self.columns.len());
        for (ordinal, (name, column_type)) in self.columns.iter().enumerate() {
            if name.is_empty() {
                return Err(TableError::InvalidSchema("column names must not be empty".into()));
            }
            if columns.iter().any(|c| c.name() == name) {
                return Err(TableError::InvalidSchema(format!("duplicate column '{}'", name)));
            }
            columns.push(Column::new(name.clone(), ordinal, *column_type));
        }
        let ordinal_of = |name: &str| {
            columns
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
        };

        // simple indexes, one per column
        let mut simple: Vec<Option<Box<dyn Index>>> = (0..columns.len()).map(|_| None).collect();
        let mut attached: Vec<(usize, usize)> = Vec::new();
        for (num, spec) in std::mem::take(&mut self.simple).into_iter().enumerate() {
            let ordinal = ordinal_of(&spec.column)?;
            if simple[ordinal].is_some() {
                return Err(TableError::InvalidSchema(format!(
                    "column '{}' already has an index",
                    spec.column
                )));
            }
            let template = key_template(&columns[ordinal])?;
            simple[ordinal] = Some(self.make_index(&spec.column, template, spec.index)?);
            attached.push((ordinal, num));
        }

        let mut compound = Vec::new();
        for spec in std::mem::take(&mut self.compound) {
            let ords = resolve_distinct(&spec.columns, &ordinal_of)?;
            if compound.iter().any(|c: &CompoundIndex| c.first == ords[0] && c.second == ords[1]) {
                return Err(TableError::InvalidSchema(format!(
                    "duplicate compound index on ({})",
                    spec.columns.join(", ")
                )));
            }
            let template = FixedLengthKey::compound(key_template(&columns[ords[0]])?, key_template(&columns[ords[1]])?);
            let name = spec.columns.join("+");
            compound.push(CompoundIndex {
                first: ords[0],
                second: ords[1],
                index: self.make_index(&name, template, spec.index)?,
            });
        }

        let mut compound_value = Vec::new();
        for spec in std::mem::take(&mut self.compound_value) {
            let ords = resolve_distinct(&spec.columns, &ordinal_of)?;
            if compound_value
                .iter()
                .any(|c: &CompoundValueIndex| c.first == ords[0] && c.second == ords[1] && c.value == ords[2])
            {
                return Err(TableError::InvalidSchema(format!(
                    "duplicate compound value index on ({})",
                    spec.columns.join(", ")
                )));
            }
            let template = FixedLengthKey::compound_and_value(
                key_template(&columns[ords[0]])?,
                key_template(&columns[ords[1]])?,
                key_template(&columns[ords[2]])?,
            );
            let name = format!("{}+{}={}", spec.columns[0], spec.columns[1], spec.columns[2]);
            compound_value.push(CompoundValueIndex {
                first: ords[0],
                second: ords[1],
                value: ords[2],
                index: self.make_index(&name, template, spec.index)?,
            });
        }

        let identity = match &self.identity {
            Some(name) => {
                let ordinal = ordinal_of(name)?;
                if columns[ordinal].column_type() != ColumnType::Int {
                    return Err(TableError::InvalidSchema(format!(
                        "identity column '{}' must be int",
                        name
                    )));
                }
                Some(ordinal)
            }
            None => None,
        };
        let sort_column = match &self.sort_column {
            Some(name) => {
                let ordinal = ordinal_of(name)?;
                if simple[ordinal].is_none() {
                    return Err(TableError::InvalidSchema(format!(
                        "sort column '{}' has no index",
                        name
                    )));
                }
                Some(ordinal)
            }
            None => None,
        };

        for (ordinal, num) in attached {
            columns[ordinal].attach_index(num);
        }
        let schema = Arc::new(TableSchema::new(columns, identity, sort_column));

        let file = RecordFile::open(&self.path)?;
        let metrics = Arc::new(TableMetrics::new());
        let blobs = self.blobs.take().unwrap_or_else(|| Box::new(MemoryBlobStore::new()));
        let mut engine = TableEngine::new(
            file,
            Arc::clone(&schema),
            simple,
            compound,
            compound_value,
            Arc::clone(&metrics),
            blobs,
            self.options,
        );

        let mut needs_rebuild = match TableMeta::load(engine.meta_path())? {
            Some(meta) => {
                meta.check_schema(&schema.describe())?;
                engine.count = meta.record_count;
                engine.next_id = meta.next_id;
                let stale = !meta.matches_file(engine.file_len());
                if stale {
                    Logger::warn(
                        "TABLE_UNCLEAN_SHUTDOWN",
                        &[
                            ("table", &self.path.display().to_string()),
                            ("recorded_len", &meta.data_len.to_string()),
                            ("file_len", &engine.file_len().to_string()),
                            ("clean", if meta.clean { "true" } else { "false" }),
                        ],
                    );
                }
                stale
            }
            None => engine.file_len() > 0,
        };

        engine.open_indexes()?;
        // counts recorded by an unclean shutdown are not comparable
        let diverged = if needs_rebuild { None } else { engine.diverged_index() };
        if let Some((index, entries)) = diverged {
            if !self.options.rebuild_on_divergence {
                return Err(TableError::bad_indexes(
                    0,
                    format!(
                        "index '{}' holds {} entries, table holds {} records",
                        index, entries, engine.count
                    ),
                ));
            }
            Logger::warn(
                "TABLE_INDEX_DIVERGED",
                &[
                    ("table", &self.path.display().to_string()),
                    ("index", &index),
                    ("entries", &entries.to_string()),
                    ("records", &engine.count.to_string()),
                ],
            );
            needs_rebuild = true;
        }
        if needs_rebuild {
            TableRebuilder::new(&mut engine, false).run()?;
        } else {
            engine.save_meta()?;
        }

        Logger::info(
            "TABLE_OPEN",
            &[
                ("table", &self.path.display().to_string()),
                ("records", &engine.count.to_string()),
                ("columns", &schema.len().to_string()),
            ],
        );

        Ok(Table {
            engine: EngineLock::new(engine),
            schema,
            metrics,
            path: self.path,
        })
    }
}

fn key_template(column: &Column) -> TableResult<FixedLengthKey> {
    column.key_template().ok_or_else(|| {
        TableError::InvalidSchema(format!(
            "column '{}' of type {} cannot be indexed",
            column.name(),
            column.column_type()
        ))
    })
}

fn resolve_distinct(names: &[String], ordinal_of: &impl Fn(&str) -> TableResult<usize>) -> TableResult<Vec<usize>> {
    let mut ords = Vec::with_capacity(names.len());
    for name in names {
        let ordinal = ordinal_of(name)?;
        if ords.contains(&ordinal) {
            return Err(TableError::InvalidSchema(format!(
                "compound index repeats column '{}'",
                name
            )));
        }
        ords.push(ordinal);
    }
    Ok(ords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base(dir: &TempDir) -> TableBuilder {
        TableBuilder::new(dir.path().join("t.dat"))
            .column("id", ColumnType::Int)
            .column("data", ColumnType::Blob)
            .column("name", ColumnType::String)
    }

    fn code(result: TableResult<Table>) -> &'static str {
        match result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        }
    }

    #[test]
    fn test_rejects_bad_definitions() {
        let dir = TempDir::new().unwrap();
        assert_eq!(code(TableBuilder::new(dir.path().join("e.dat")).open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).column("id", ColumnType::Int).open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).index("data").open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).index("nope").open()), "AERO_COLUMN_NOT_FOUND");
        assert_eq!(code(base(&dir).index("id").index("id").open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).compound_index("id", "id").open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).identity("name").open()), "AERO_INVALID_SCHEMA");
        assert_eq!(code(base(&dir).sort_column("id").open()), "AERO_INVALID_SCHEMA");
    }

    #[test]
    fn test_index_side_files_named_after_columns() {
        let dir = TempDir::new().unwrap();
        let table = base(&dir)
            .index("id")
            .compound_index("id", "name")
            .open()
            .unwrap();
        let mut r = table.new_record();
        r.set("name", "x").unwrap();
        table.commit(&mut r).unwrap();
        table.flush().unwrap();
        assert!(dir.path().join("t.dat.id.idx").exists());
        assert!(dir.path().join("t.dat.id-name.idx").exists());
        assert!(dir.path().join("t.dat.meta.json").exists());
    }

    #[test]
    fn test_reopen_restores_count_and_identity() {
        let dir = TempDir::new().unwrap();
        let open = || {
            TableBuilder::new(dir.path().join("t.dat"))
                .column("id", ColumnType::Int)
                .index("id")
                .identity("id")
                .open()
                .unwrap()
        };
        {
            let table = open();
            for _ in 0..3 {
                let mut r = table.new_record();
                table.commit(&mut r).unwrap();
            }
            table.shutdown().unwrap();
        }
        let table = open();
        assert_eq!(table.count(), 3);
        assert_eq!(table.new_record().get_int("id").unwrap(), 4);
    }

    #[test]
    fn test_missing_meta_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let open = || {
            TableBuilder::new(dir.path().join("t.dat"))
                .column("id", ColumnType::Int)
                .index("id")
                .open()
                .unwrap()
        };
        {
            let table = open();
            for i in 0..4 {
                let mut r = table.new_record();
                r.set("id", i).unwrap();
                table.commit(&mut r).unwrap();
            }
        }
        std::fs::remove_file(dir.path().join("t.dat.meta.json")).unwrap();
        std::fs::remove_file(dir.path().join("t.dat.id.idx")).unwrap();

        let table = open();
        assert_eq!(table.count(), 4);
        assert_eq!(table.select("id", 2).unwrap().len(), Some(1));
    }

    #[test]
    fn test_divergence_without_rebuild_is_bad_indexes() {
        let dir = TempDir::new().unwrap();
        {
            let table = base(&dir).index("id").open().unwrap();
            let mut r = table.new_record();
            table.commit(&mut r).unwrap();
        }
        std::fs::remove_file(dir.path().join("t.dat.id.idx")).unwrap();

        let options = TableOptions {
            rebuild_on_divergence: false,
            ..TableOptions::default()
        };
        let err = base(&dir).index("id").options(options).open().err().unwrap();
        assert!(err.is_bad_indexes());
    }

    #[test]
    fn test_unclean_shutdown_rebuilds_even_without_divergence_rebuild() {
        let dir = TempDir::new().unwrap();
        let options = TableOptions {
            rebuild_on_divergence: false,
            ..TableOptions::default()
        };
        {
            let table = base(&dir).index("id").options(options).open().unwrap();
            for i in 0..3 {
                let mut r = table.new_record();
                r.set("id", i).unwrap();
                table.commit(&mut r).unwrap();
            }
            std::mem::forget(table);
        }

        let table = base(&dir).index("id").options(options).open().unwrap();
        assert_eq!(table.count(), 3);
        assert_eq!(table.select("id", 1).unwrap().len(), Some(1));
    }
}
