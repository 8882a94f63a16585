//! aerotable - a record-file table engine with pluggable secondary indexes
//!
//! Records live in one append-mostly data file. Secondary indexes map
//! fixed-length keys to record offsets and answer exact-match and range
//! queries. Corruption is detected on read and repaired by rebuild.

pub mod blob;
pub mod cli;
pub mod column;
pub mod index;
pub mod key;
pub mod observability;
pub mod record;
pub mod result_set;
pub mod storage;
pub mod table;
