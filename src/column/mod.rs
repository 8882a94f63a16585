//! Columns: typed field codecs
//!
//! On-disk layout per type (little-endian):
//!
//! ```text
//! Int       i32
//! Double    f64 bits
//! DateTime  i64 ticks
//! Blob      u64 handle
//! String    u32 byte length | UTF-8 bytes | end marker (4 bytes)
//! ```
//!
//! The string end marker contains bytes that never occur in UTF-8, so a
//! forward search from the start of a string's content always finds that
//! string's own marker first.

mod value;

use std::io::{self, Read, Write};

use crate::blob::BlobHandle;
use crate::key::{from_ticks, is_valid_ticks, to_ticks, FixedLengthKey};
use crate::storage::case_insensitive_hash;

pub use value::{ColumnType, ColumnValue};

/// Sentinel written after every string's content
pub const STRING_END_MARKER: [u8; 4] = [0xFF, 0xFE, 0xFF, 0xFE];

/// Why a value could not be decoded
#[derive(Debug)]
pub enum LoadError {
    /// Read failure, including unexpected end of file
    Io(io::Error),
    /// Timestamp ticks outside the valid range
    BadTimestamp { ticks: i64 },
    /// String length runs past the end of the file
    StringTooLong { length: u32, available: u64 },
    /// The four bytes after the string content are not the end marker
    MissingEndMarker { length: u32 },
    /// Content between length and marker is not UTF-8
    InvalidUtf8 { lossy: String },
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                write!(f, "unexpected end of stream mid-record")
            }
            LoadError::Io(e) => write!(f, "I/O error: {}", e),
            LoadError::BadTimestamp { ticks } => write!(f, "malformed timestamp ({} ticks)", ticks),
            LoadError::StringTooLong { length, available } => write!(
                f,
                "string length {} exceeds the {} bytes available",
                length, available
            ),
            LoadError::MissingEndMarker { length } => {
                write!(f, "string of length {} has no end marker", length)
            }
            LoadError::InvalidUtf8 { .. } => write!(f, "string content is not valid UTF-8"),
        }
    }
}

/// One field of a table schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    ordinal: usize,
    column_type: ColumnType,
    index_num: Option<usize>,
}

impl Column {
    pub fn new(name: impl Into<String>, ordinal: usize, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            ordinal,
            column_type,
            index_num: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Number of the simple index attached to this column
    pub fn index_num(&self) -> Option<usize> {
        self.index_num
    }

    pub(crate) fn attach_index(&mut self, index_num: usize) {
        self.index_num = Some(index_num);
    }

    pub fn fixed_width(&self) -> Option<u64> {
        self.column_type.fixed_width()
    }

    /// Key template for an index over this column.
    ///
    /// Strings index by their case-insensitive hash, so they use an `Int`
    /// template. BLOB columns have no key.
    pub fn key_template(&self) -> Option<FixedLengthKey> {
        match self.column_type {
            ColumnType::Int | ColumnType::String => Some(FixedLengthKey::Int(0)),
            ColumnType::Double => Some(FixedLengthKey::Double(0.0)),
            ColumnType::DateTime => Some(FixedLengthKey::DateTime(0)),
            ColumnType::Blob => None,
        }
    }

    /// Index key for `value`, or `None` if the value has no key
    pub fn key_for(&self, value: &ColumnValue) -> Option<FixedLengthKey> {
        match value {
            ColumnValue::Int(v) => Some(FixedLengthKey::Int(*v)),
            ColumnValue::Double(v) => Some(FixedLengthKey::Double(*v)),
            ColumnValue::DateTime(v) => Some(FixedLengthKey::DateTime(to_ticks(v))),
            ColumnValue::String(v) => Some(FixedLengthKey::Int(case_insensitive_hash(v))),
            ColumnValue::Blob(_) => None,
        }
    }

    /// Serializes `value`, returning the number of bytes written.
    pub fn save_value<W: Write>(&self, value: &ColumnValue, writer: &mut W) -> io::Result<usize> {
        match value {
            ColumnValue::Int(v) => {
                writer.write_all(&v.to_le_bytes())?;
                Ok(4)
            }
            ColumnValue::Double(v) => {
                writer.write_all(&v.to_bits().to_le_bytes())?;
                Ok(8)
            }
            ColumnValue::DateTime(v) => {
                writer.write_all(&to_ticks(v).to_le_bytes())?;
                Ok(8)
            }
            ColumnValue::Blob(h) => {
                writer.write_all(&h.0.to_le_bytes())?;
                Ok(8)
            }
            ColumnValue::String(s) => {
                let bytes = s.as_bytes();
                let length = u32::try_from(bytes.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "string longer than u32::MAX bytes")
                })?;
                writer.write_all(&length.to_le_bytes())?;
                writer.write_all(bytes)?;
                writer.write_all(&STRING_END_MARKER)?;
                Ok(4 + bytes.len() + STRING_END_MARKER.len())
            }
        }
    }

    /// Decodes one value of this column's type.
    ///
    /// `available` is the number of bytes between the reader's position
    /// and end of file; it bounds string lengths before any allocation.
    pub fn load_value<R: Read>(&self, reader: &mut R, available: u64) -> Result<ColumnValue, LoadError> {
        match self.column_type {
            ColumnType::Int => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                Ok(ColumnValue::Int(i32::from_le_bytes(buf)))
            }
            ColumnType::Double => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                Ok(ColumnValue::Double(f64::from_bits(u64::from_le_bytes(buf))))
            }
            ColumnType::DateTime => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                let ticks = i64::from_le_bytes(buf);
                if !is_valid_ticks(ticks) {
                    return Err(LoadError::BadTimestamp { ticks });
                }
                from_ticks(ticks)
                    .map(ColumnValue::DateTime)
                    .ok_or(LoadError::BadTimestamp { ticks })
            }
            ColumnType::Blob => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                Ok(ColumnValue::Blob(BlobHandle(u64::from_le_bytes(buf))))
            }
            ColumnType::String => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                let length = u32::from_le_bytes(buf);
                let needed = 4 + u64::from(length) + STRING_END_MARKER.len() as u64;
                if needed > available {
                    return Err(LoadError::StringTooLong {
                        length,
                        available: available.saturating_sub(4),
                    });
                }

                let mut content = vec![0u8; length as usize];
                reader.read_exact(&mut content)?;
                let mut marker = [0u8; 4];
                reader.read_exact(&mut marker)?;
                if marker != STRING_END_MARKER {
                    return Err(LoadError::MissingEndMarker { length });
                }

                String::from_utf8(content)
                    .map(ColumnValue::String)
                    .map_err(|e| LoadError::InvalidUtf8 {
                        lossy: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    })
            }
        }
    }

    /// Encoded size of `value` in this column
    pub fn encoded_len(&self, value: &ColumnValue) -> u64 {
        match value {
            ColumnValue::String(s) => 4 + s.len() as u64 + STRING_END_MARKER.len() as u64,
            other => other.column_type().fixed_width().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn round_trip(column: &Column, value: ColumnValue) -> ColumnValue {
        let mut buf = Vec::new();
        let written = column.save_value(&value, &mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written as u64, column.encoded_len(&value));
        let available = buf.len() as u64;
        column.load_value(&mut Cursor::new(buf), available).unwrap()
    }

    #[test]
    fn test_values_survive_encoding() {
        let dt = NaiveDate::from_ymd_opt(2020, 5, 17).unwrap().and_hms_opt(8, 0, 1).unwrap();
        let cases = vec![
            (ColumnType::Int, ColumnValue::Int(-42)),
            (ColumnType::Double, ColumnValue::Double(3.25)),
            (ColumnType::DateTime, ColumnValue::DateTime(dt)),
            (ColumnType::String, ColumnValue::from("héllo")),
            (ColumnType::String, ColumnValue::from("")),
            (ColumnType::Blob, ColumnValue::Blob(BlobHandle(77))),
        ];
        for (ty, value) in cases {
            let column = Column::new("c", 0, ty);
            assert_eq!(round_trip(&column, value.clone()), value);
        }
    }

    #[test]
    fn test_string_layout() {
        let column = Column::new("s", 0, ColumnType::String);
        let mut buf = Vec::new();
        column.save_value(&ColumnValue::from("ab"), &mut buf).unwrap();
        assert_eq!(&buf[..4], &2u32.to_le_bytes());
        assert_eq!(&buf[4..6], b"ab");
        assert_eq!(&buf[6..], &STRING_END_MARKER);
    }

    #[test]
    fn test_missing_end_marker_detected() {
        let column = Column::new("s", 0, ColumnType::String);
        let mut buf = Vec::new();
        column.save_value(&ColumnValue::from("abcd"), &mut buf).unwrap();
        buf[0] = 2; // claim a shorter string
        let available = buf.len() as u64;
        let err = column.load_value(&mut Cursor::new(buf), available).unwrap_err();
        assert!(matches!(err, LoadError::MissingEndMarker { length: 2 }));
    }

    #[test]
    fn test_overlong_string_detected() {
        let column = Column::new("s", 0, ColumnType::String);
        let mut buf = Vec::new();
        column.save_value(&ColumnValue::from("abcd"), &mut buf).unwrap();
        buf[..4].copy_from_slice(&1_000_000u32.to_le_bytes());
        let available = buf.len() as u64;
        let err = column.load_value(&mut Cursor::new(buf), available).unwrap_err();
        assert!(matches!(err, LoadError::StringTooLong { length: 1_000_000, .. }));
    }

    #[test]
    fn test_bad_timestamp_detected() {
        let column = Column::new("t", 0, ColumnType::DateTime);
        let buf = (-5i64).to_le_bytes().to_vec();
        let err = column.load_value(&mut Cursor::new(buf), 8).unwrap_err();
        assert!(matches!(err, LoadError::BadTimestamp { ticks: -5 }));
    }

    #[test]
    fn test_string_keys_hash_case_insensitively() {
        let column = Column::new("s", 0, ColumnType::String);
        assert_eq!(
            column.key_for(&ColumnValue::from("Alpha")),
            column.key_for(&ColumnValue::from("ALPHA"))
        );
        assert_eq!(column.key_template(), Some(FixedLengthKey::Int(0)));
    }

    #[test]
    fn test_blob_has_no_key() {
        let column = Column::new("b", 0, ColumnType::Blob);
        assert!(column.key_template().is_none());
        assert!(column.key_for(&ColumnValue::Blob(BlobHandle(1))).is_none());
    }
}
