//! Secondary indexes
//!
//! The table talks to indexes only through the [`Index`] trait: add and
//! remove key/offset pairs, range search, enumerate, lifecycle, counts.
//!
//! # Design Principles
//!
//! - Keys are fixed-length and totally ordered
//! - Offsets per key are kept sorted ascending
//! - The live-entry count of every index equals the table's record count
//!
//! [`BTreeIndex`] is the bundled implementation.

mod btree;
mod contract;
mod errors;

pub use btree::BTreeIndex;
pub use contract::{Index, IndexEntry, IndexEnumerator, IndexOpenOptions};
pub use errors::{IndexError, IndexErrorCode, IndexResult};
