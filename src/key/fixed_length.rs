//! Fixed-length index keys
//!
//! Every key variant serializes to a constant number of bytes
//! (little-endian), so an index can store keys in fixed-size slots and
//! materialize a key of unknown shape by cloning a template and reading
//! into it.
//!
//! Ordering across variants is by variant first (Int < Double < DateTime <
//! Compound < CompoundAndValue), then by value. Indexes only ever compare
//! keys of one shape, the cross-variant order just keeps `Ord` total.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read, Write};

use super::ticks::MAX_TICKS;

/// A comparable key with a fixed serialized size
#[derive(Debug, Clone)]
pub enum FixedLengthKey {
    /// 32-bit integer, also used for case-insensitive string hashes
    Int(i32),
    /// IEEE-754 double ordered by its total order
    Double(f64),
    /// Timestamp in ticks
    DateTime(i64),
    /// Two sub-keys compared lexicographically
    Compound(Box<FixedLengthKey>, Box<FixedLengthKey>),
    /// Two sub-keys plus a value key
    CompoundAndValue(
        Box<FixedLengthKey>,
        Box<FixedLengthKey>,
        Box<FixedLengthKey>,
    ),
}

/// Smallest double in the IEEE-754 total order (negative NaN, all payload bits)
const DOUBLE_MIN_BITS: u64 = u64::MAX;
/// Largest double in the IEEE-754 total order (positive NaN, all payload bits)
const DOUBLE_MAX_BITS: u64 = 0x7FFF_FFFF_FFFF_FFFF;

impl FixedLengthKey {
    /// Builds a two-part compound key
    pub fn compound(first: FixedLengthKey, second: FixedLengthKey) -> Self {
        FixedLengthKey::Compound(Box::new(first), Box::new(second))
    }

    /// Builds a compound key carrying an extra value key
    pub fn compound_and_value(
        first: FixedLengthKey,
        second: FixedLengthKey,
        value: FixedLengthKey,
    ) -> Self {
        FixedLengthKey::CompoundAndValue(Box::new(first), Box::new(second), Box::new(value))
    }

    /// Number of bytes `write` emits for this key
    pub fn key_size(&self) -> usize {
        match self {
            FixedLengthKey::Int(_) => 4,
            FixedLengthKey::Double(_) | FixedLengthKey::DateTime(_) => 8,
            FixedLengthKey::Compound(a, b) => a.key_size() + b.key_size(),
            FixedLengthKey::CompoundAndValue(a, b, v) => a.key_size() + b.key_size() + v.key_size(),
        }
    }

    /// A key of the same shape holding the minimum sentinel everywhere
    pub fn min_key(&self) -> Self {
        match self {
            FixedLengthKey::Int(_) => FixedLengthKey::Int(i32::MIN),
            FixedLengthKey::Double(_) => FixedLengthKey::Double(f64::from_bits(DOUBLE_MIN_BITS)),
            FixedLengthKey::DateTime(_) => FixedLengthKey::DateTime(0),
            FixedLengthKey::Compound(a, b) => Self::compound(a.min_key(), b.min_key()),
            FixedLengthKey::CompoundAndValue(a, b, v) => {
                Self::compound_and_value(a.min_key(), b.min_key(), v.min_key())
            }
        }
    }

    /// A key of the same shape holding the maximum sentinel everywhere
    pub fn max_key(&self) -> Self {
        match self {
            FixedLengthKey::Int(_) => FixedLengthKey::Int(i32::MAX),
            FixedLengthKey::Double(_) => FixedLengthKey::Double(f64::from_bits(DOUBLE_MAX_BITS)),
            FixedLengthKey::DateTime(_) => FixedLengthKey::DateTime(MAX_TICKS),
            FixedLengthKey::Compound(a, b) => Self::compound(a.max_key(), b.max_key()),
            FixedLengthKey::CompoundAndValue(a, b, v) => {
                Self::compound_and_value(a.max_key(), b.max_key(), v.max_key())
            }
        }
    }

    /// Clone-only factory
    pub fn factory(&self) -> Self {
        self.clone()
    }

    /// Clone-then-read factory: a fresh key of this shape read from `reader`
    pub fn read_like<R: Read>(&self, reader: &mut R) -> io::Result<Self> {
        let mut key = self.factory();
        key.read(reader)?;
        Ok(key)
    }

    /// Serializes the key, returning the number of bytes written
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        match self {
            FixedLengthKey::Int(v) => writer.write_all(&v.to_le_bytes())?,
            FixedLengthKey::Double(v) => writer.write_all(&v.to_bits().to_le_bytes())?,
            FixedLengthKey::DateTime(v) => writer.write_all(&v.to_le_bytes())?,
            FixedLengthKey::Compound(a, b) => {
                a.write(writer)?;
                b.write(writer)?;
            }
            FixedLengthKey::CompoundAndValue(a, b, v) => {
                a.write(writer)?;
                b.write(writer)?;
                v.write(writer)?;
            }
        }
        Ok(self.key_size())
    }

    /// Reads a value of this key's shape into `self`
    pub fn read<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        match self {
            FixedLengthKey::Int(v) => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                *v = i32::from_le_bytes(buf);
            }
            FixedLengthKey::Double(v) => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                *v = f64::from_bits(u64::from_le_bytes(buf));
            }
            FixedLengthKey::DateTime(v) => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                *v = i64::from_le_bytes(buf);
            }
            FixedLengthKey::Compound(a, b) => {
                a.read(reader)?;
                b.read(reader)?;
            }
            FixedLengthKey::CompoundAndValue(a, b, v) => {
                a.read(reader)?;
                b.read(reader)?;
                v.read(reader)?;
            }
        }
        Ok(())
    }

    /// Integer value, if this is an `Int` key
    pub fn as_int(&self) -> Option<i32> {
        match self {
            FixedLengthKey::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Double value, if this is a `Double` key
    pub fn as_double(&self) -> Option<f64> {
        match self {
            FixedLengthKey::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Tick value, if this is a `DateTime` key
    pub fn as_ticks(&self) -> Option<i64> {
        match self {
            FixedLengthKey::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Sets an `Int` key; `None` coerces to the minimum sentinel.
    ///
    /// Returns false if this key is not an `Int`.
    pub fn set_int(&mut self, value: Option<i32>) -> bool {
        match self {
            FixedLengthKey::Int(v) => {
                *v = value.unwrap_or(i32::MIN);
                true
            }
            _ => false,
        }
    }

    /// Sets a `Double` key; `None` coerces to the minimum sentinel
    pub fn set_double(&mut self, value: Option<f64>) -> bool {
        match self {
            FixedLengthKey::Double(v) => {
                *v = value.unwrap_or_else(|| f64::from_bits(DOUBLE_MIN_BITS));
                true
            }
            _ => false,
        }
    }

    /// Sets a `DateTime` key; `None` coerces to tick 0
    pub fn set_ticks(&mut self, value: Option<i64>) -> bool {
        match self {
            FixedLengthKey::DateTime(v) => {
                *v = value.unwrap_or(0);
                true
            }
            _ => false,
        }
    }

    /// Second sub-key of a compound key
    pub fn second(&self) -> Option<&FixedLengthKey> {
        match self {
            FixedLengthKey::Compound(_, b) | FixedLengthKey::CompoundAndValue(_, b, _) => Some(b),
            _ => None,
        }
    }

    /// Value sub-key of a compound-and-value key
    pub fn value(&self) -> Option<&FixedLengthKey> {
        match self {
            FixedLengthKey::CompoundAndValue(_, _, v) => Some(v),
            _ => None,
        }
    }

    /// True if `other` has the same variant structure as `self`
    pub fn same_shape(&self, other: &FixedLengthKey) -> bool {
        use FixedLengthKey::*;
        match (self, other) {
            (Int(_), Int(_)) | (Double(_), Double(_)) | (DateTime(_), DateTime(_)) => true,
            (Compound(a1, b1), Compound(a2, b2)) => a1.same_shape(a2) && b1.same_shape(b2),
            (CompoundAndValue(a1, b1, v1), CompoundAndValue(a2, b2, v2)) => {
                a1.same_shape(a2) && b1.same_shape(b2) && v1.same_shape(v2)
            }
            _ => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FixedLengthKey::Int(_) => 0,
            FixedLengthKey::Double(_) => 1,
            FixedLengthKey::DateTime(_) => 2,
            FixedLengthKey::Compound(..) => 3,
            FixedLengthKey::CompoundAndValue(..) => 4,
        }
    }
}

impl Ord for FixedLengthKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use FixedLengthKey::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Compound(a1, b1), Compound(a2, b2)) => a1.cmp(a2).then_with(|| b1.cmp(b2)),
            (CompoundAndValue(a1, b1, v1), CompoundAndValue(a2, b2, v2)) => a1
                .cmp(a2)
                .then_with(|| b1.cmp(b2))
                .then_with(|| v1.cmp(v2)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FixedLengthKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FixedLengthKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FixedLengthKey {}

impl fmt::Display for FixedLengthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixedLengthKey::Int(v) => write!(f, "{}", v),
            FixedLengthKey::Double(v) => write!(f, "{}", v),
            FixedLengthKey::DateTime(v) => write!(f, "@{}", v),
            FixedLengthKey::Compound(a, b) => write!(f, "({}, {})", a, b),
            FixedLengthKey::CompoundAndValue(a, b, v) => write!(f, "({}, {}) = {}", a, b, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn samples() -> Vec<FixedLengthKey> {
        vec![
            FixedLengthKey::Int(-7),
            FixedLengthKey::Double(-0.5),
            FixedLengthKey::DateTime(638_000_000_000_000_000),
            FixedLengthKey::compound(FixedLengthKey::Int(1), FixedLengthKey::Double(2.5)),
            FixedLengthKey::compound_and_value(
                FixedLengthKey::DateTime(5),
                FixedLengthKey::Int(9),
                FixedLengthKey::Double(1e300),
            ),
        ]
    }

    #[test]
    fn test_write_emits_declared_size() {
        for key in samples() {
            let mut buf = Vec::new();
            let written = key.write(&mut buf).unwrap();
            assert_eq!(written, key.key_size());
            assert_eq!(buf.len(), key.key_size());
        }
    }

    #[test]
    fn test_read_like_reproduces_key() {
        for key in samples() {
            let mut buf = Vec::new();
            key.write(&mut buf).unwrap();
            let mut cursor = Cursor::new(buf);
            let read = key.min_key().read_like(&mut cursor).unwrap();
            assert_eq!(read, key);
            assert_eq!(cursor.position() as usize, key.key_size());
        }
    }

    #[test]
    fn test_sentinels_bound_every_value() {
        let doubles = [f64::NEG_INFINITY, -1.0, -0.0, 0.0, 1.0, f64::INFINITY, f64::NAN];
        let template = FixedLengthKey::Double(0.0);
        for p in doubles {
            let k = FixedLengthKey::Double(p);
            assert!(template.min_key() <= k);
            assert!(k <= template.max_key());
        }
        let int = FixedLengthKey::Int(0);
        assert_eq!(int.min_key(), FixedLengthKey::Int(i32::MIN));
        assert_eq!(int.max_key(), FixedLengthKey::Int(i32::MAX));
    }

    #[test]
    fn test_compound_orders_lexicographically() {
        let a = FixedLengthKey::compound(FixedLengthKey::Int(1), FixedLengthKey::Int(9));
        let b = FixedLengthKey::compound(FixedLengthKey::Int(2), FixedLengthKey::Int(0));
        let c = FixedLengthKey::compound(FixedLengthKey::Int(2), FixedLengthKey::Int(1));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_negative_zero_distinct_from_zero() {
        let neg = FixedLengthKey::Double(-0.0);
        let pos = FixedLengthKey::Double(0.0);
        assert!(neg < pos);
        assert_ne!(neg, pos);
    }

    #[test]
    fn test_setters_coerce_absent_to_min() {
        let mut key = FixedLengthKey::Int(5);
        assert!(key.set_int(None));
        assert_eq!(key.as_int(), Some(i32::MIN));
        assert!(!key.set_double(Some(1.0)));

        let mut ts = FixedLengthKey::DateTime(99);
        assert!(ts.set_ticks(None));
        assert_eq!(ts.as_ticks(), Some(0));
    }
}
