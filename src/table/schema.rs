//! Table schema: ordered columns and the flags they imply

use crate::column::{Column, ColumnType, ColumnValue};
use crate::key::{is_valid_ticks, to_ticks};
use crate::storage::RecordMarker;

use super::errors::{TableError, TableResult};
use super::meta::ColumnMeta;

/// Immutable description of a table's records
#[derive(Debug)]
pub struct TableSchema {
    columns: Vec<Column>,
    record_size: Option<u64>,
    can_update: bool,
    identity: Option<usize>,
    sort_column: Option<usize>,
}

impl TableSchema {
    pub(crate) fn new(columns: Vec<Column>, identity: Option<usize>, sort_column: Option<usize>) -> Self {
        let can_update = !columns.iter().any(|c| c.column_type().disables_update());
        let record_size = if can_update {
            columns
                .iter()
                .map(|c| c.fixed_width())
                .sum::<Option<u64>>()
                .map(|w| w + 1)
        } else {
            None
        };
        Self {
            columns,
            record_size,
            can_update,
            identity,
            sort_column,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, ordinal: usize) -> Option<&Column> {
        self.columns.get(ordinal)
    }

    /// Ordinal of the column called `name`
    pub fn ordinal_of(&self, name: &str) -> TableResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    pub fn column_named(&self, name: &str) -> TableResult<&Column> {
        let ordinal = self.ordinal_of(name)?;
        Ok(&self.columns[ordinal])
    }

    /// Size of every physical record, marker included, if fixed
    pub fn record_size(&self) -> Option<u64> {
        self.record_size
    }

    pub fn is_fixed_size(&self) -> bool {
        self.record_size.is_some()
    }

    /// False once any string or BLOB column exists
    pub fn can_update(&self) -> bool {
        self.can_update
    }

    pub fn identity(&self) -> Option<usize> {
        self.identity
    }

    pub fn sort_column(&self) -> Option<usize> {
        self.sort_column
    }

    pub fn has_blobs(&self) -> bool {
        self.columns.iter().any(|c| c.column_type() == ColumnType::Blob)
    }

    /// Field values of a freshly created record
    pub fn default_values(&self) -> Vec<ColumnValue> {
        self.columns
            .iter()
            .map(|c| ColumnValue::default_for(c.column_type()))
            .collect()
    }

    /// Checks that `value` may be stored in column `ordinal`.
    pub fn check_value(&self, ordinal: usize, value: &ColumnValue) -> TableResult<()> {
        let column = self
            .columns
            .get(ordinal)
            .ok_or_else(|| TableError::ColumnNotFound(format!("#{}", ordinal)))?;
        if value.column_type() != column.column_type() {
            return Err(TableError::TypeMismatch {
                column: column.name().to_string(),
                expected: column.column_type(),
                actual: value.column_type(),
            });
        }
        if let ColumnValue::DateTime(dt) = value {
            if !is_valid_ticks(to_ticks(dt)) {
                return Err(TableError::InvalidValue {
                    column: column.name().to_string(),
                    reason: format!("{} is outside years 1..=9999", dt),
                });
            }
        }
        Ok(())
    }

    /// Checks a full field array.
    pub fn check_values(&self, values: &[ColumnValue]) -> TableResult<()> {
        if values.len() != self.columns.len() {
            return Err(TableError::InvalidSchema(format!(
                "record has {} values, schema has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (ordinal, value) in values.iter().enumerate() {
            self.check_value(ordinal, value)?;
        }
        Ok(())
    }

    /// Physical bytes of a record: marker then each value in schema order
    pub fn encode(&self, marker: RecordMarker, values: &[ColumnValue]) -> TableResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.record_size.unwrap_or(64) as usize);
        buf.push(marker.to_byte());
        for (column, value) in self.columns.iter().zip(values) {
            column.save_value(value, &mut buf)?;
        }
        Ok(buf)
    }

    /// Schema snapshot stored in table metadata
    pub fn describe(&self) -> Vec<ColumnMeta> {
        self.columns
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                column_type: c.column_type(),
            })
            .collect()
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(types: &[ColumnType]) -> TableSchema {
        let columns = types
            .iter()
            .enumerate()
            .map(|(i, t)| Column::new(format!("c{}", i), i, *t))
            .collect();
        TableSchema::new(columns, None, None)
    }

    #[test]
    fn test_fixed_size_table() {
        let s = schema(&[ColumnType::Int, ColumnType::Double, ColumnType::DateTime]);
        assert!(s.can_update());
        assert_eq!(s.record_size(), Some(1 + 4 + 8 + 8));
    }

    #[test]
    fn test_string_disables_update() {
        let s = schema(&[ColumnType::Int, ColumnType::String]);
        assert!(!s.can_update());
        assert_eq!(s.record_size(), None);
    }

    #[test]
    fn test_blob_disables_update() {
        let s = schema(&[ColumnType::Int, ColumnType::Blob]);
        assert!(!s.can_update());
        assert!(s.has_blobs());
    }

    #[test]
    fn test_encode_matches_record_size() {
        let s = schema(&[ColumnType::Int, ColumnType::Double]);
        let bytes = s
            .encode(RecordMarker::Normal, &[ColumnValue::Int(1), ColumnValue::Double(2.0)])
            .unwrap();
        assert_eq!(bytes.len() as u64, s.record_size().unwrap());
        assert_eq!(bytes[0], b'N');
    }

    #[test]
    fn test_check_values_rejects_wrong_type() {
        let s = schema(&[ColumnType::Int]);
        let err = s.check_values(&[ColumnValue::from("x")]).unwrap_err();
        assert_eq!(err.code(), "AERO_TYPE_MISMATCH");
        assert!(s.check_values(&[]).is_err());
    }

    #[test]
    fn test_ordinal_lookup() {
        let s = schema(&[ColumnType::Int, ColumnType::Int]);
        assert_eq!(s.ordinal_of("c1").unwrap(), 1);
        assert!(matches!(s.ordinal_of("nope"), Err(TableError::ColumnNotFound(_))));
    }
}
