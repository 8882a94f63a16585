//! Record marker byte
//!
//! Every physical record starts with one marker byte:
//!
//! ```text
//! +--------+----------------------------------+
//! | Marker | Column values in schema order     |
//! +--------+----------------------------------+
//! ```

use std::fmt;

/// Leading byte of a physical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordMarker {
    /// Live record
    Normal,
    /// Tombstone, space reclaimed only by defragment
    Deleted,
    /// Quarantined by a repair scan
    Corrupted,
}

impl RecordMarker {
    /// On-disk byte for this marker
    pub fn to_byte(self) -> u8 {
        match self {
            RecordMarker::Normal => b'N',
            RecordMarker::Deleted => b'D',
            RecordMarker::Corrupted => b'C',
        }
    }

    /// Parses an on-disk byte. Unknown bytes are structural corruption.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(RecordMarker::Normal),
            b'D' => Some(RecordMarker::Deleted),
            b'C' => Some(RecordMarker::Corrupted),
            _ => None,
        }
    }

    pub fn is_live(self) -> bool {
        self == RecordMarker::Normal
    }
}

impl fmt::Display for RecordMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordMarker::Normal => write!(f, "NORMAL"),
            RecordMarker::Deleted => write!(f, "DELETED"),
            RecordMarker::Corrupted => write!(f, "CORRUPTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_bytes() {
        for m in [RecordMarker::Normal, RecordMarker::Deleted, RecordMarker::Corrupted] {
            assert_eq!(RecordMarker::from_byte(m.to_byte()), Some(m));
        }
        assert_eq!(RecordMarker::from_byte(0), None);
        assert!(RecordMarker::Normal.is_live());
        assert!(!RecordMarker::Deleted.is_live());
    }
}
