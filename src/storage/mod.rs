//! Record file subsystem
//!
//! One data file per table. Each physical record is a marker byte followed
//! by the column values in schema order.
//!
//! # Design Principles
//!
//! - Positioned I/O: every read and write names its offset
//! - Tombstones in place: delete flips the marker, space is reclaimed only
//!   by defragment
//! - Structural problems surface as bad-indexes errors carrying the offset

mod checksum;
mod errors;
mod file;
mod marker;

pub use checksum::{case_insensitive_hash, compute_checksum, verify_checksum};
pub use errors::{Severity, StorageError, StorageResult};
pub use file::{RecordFile, RecordReader};
pub use marker::RecordMarker;
