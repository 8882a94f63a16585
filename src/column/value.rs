//! Column types and values

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::blob::BlobHandle;
use crate::key::{min_date_time, to_ticks};

/// Logical type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Double,
    DateTime,
    String,
    Blob,
}

impl ColumnType {
    /// Serialized width, or `None` for variable-length types
    pub fn fixed_width(self) -> Option<u64> {
        match self {
            ColumnType::Int => Some(4),
            ColumnType::Double | ColumnType::DateTime | ColumnType::Blob => Some(8),
            ColumnType::String => None,
        }
    }

    /// Whether the type forces the table to be variable-size and
    /// update-disabled
    pub fn disables_update(self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Blob)
    }

    /// Whether a simple index may be attached
    pub fn is_indexable(self) -> bool {
        self != ColumnType::Blob
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Double => "double",
            ColumnType::DateTime => "datetime",
            ColumnType::String => "string",
            ColumnType::Blob => "blob",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed column value
#[derive(Debug, Clone)]
pub enum ColumnValue {
    Int(i32),
    Double(f64),
    DateTime(NaiveDateTime),
    String(String),
    Blob(BlobHandle),
}

impl ColumnValue {
    /// Value a fresh record holds for a column of `column_type`
    pub fn default_for(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Int => ColumnValue::Int(0),
            ColumnType::Double => ColumnValue::Double(0.0),
            ColumnType::DateTime => ColumnValue::DateTime(min_date_time()),
            ColumnType::String => ColumnValue::String(String::new()),
            ColumnType::Blob => ColumnValue::Blob(BlobHandle::NONE),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Int(_) => ColumnType::Int,
            ColumnValue::Double(_) => ColumnType::Double,
            ColumnValue::DateTime(_) => ColumnType::DateTime,
            ColumnValue::String(_) => ColumnType::String,
            ColumnValue::Blob(_) => ColumnType::Blob,
        }
    }

    /// Change detection used by commit and index maintenance.
    ///
    /// Doubles compare by bit pattern (NaN equals itself, -0.0 differs
    /// from 0.0), timestamps by ticks, strings byte-exact, BLOBs by handle.
    pub fn same_as(&self, other: &ColumnValue) -> bool {
        match (self, other) {
            (ColumnValue::Int(a), ColumnValue::Int(b)) => a == b,
            (ColumnValue::Double(a), ColumnValue::Double(b)) => a.to_bits() == b.to_bits(),
            (ColumnValue::DateTime(a), ColumnValue::DateTime(b)) => to_ticks(a) == to_ticks(b),
            (ColumnValue::String(a), ColumnValue::String(b)) => a == b,
            (ColumnValue::Blob(a), ColumnValue::Blob(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ColumnValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ColumnValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<&NaiveDateTime> {
        match self {
            ColumnValue::DateTime(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<BlobHandle> {
        match self {
            ColumnValue::Blob(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON rendering used by dump output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ColumnValue::Int(v) => serde_json::json!(v),
            ColumnValue::Double(v) => {
                if v.is_finite() {
                    serde_json::json!(v)
                } else {
                    serde_json::json!(v.to_string())
                }
            }
            ColumnValue::DateTime(v) => serde_json::json!(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            ColumnValue::String(v) => serde_json::json!(v),
            ColumnValue::Blob(v) => serde_json::json!(v.0),
        }
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::Double(v) => write!(f, "{}", v),
            ColumnValue::DateTime(v) => write!(f, "{}", v),
            ColumnValue::String(v) => write!(f, "{:?}", v),
            ColumnValue::Blob(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Double(v)
    }
}

impl From<NaiveDateTime> for ColumnValue {
    fn from(v: NaiveDateTime) -> Self {
        ColumnValue::DateTime(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

impl From<BlobHandle> for ColumnValue {
    fn from(v: BlobHandle) -> Self {
        ColumnValue::Blob(v)
    }
}
