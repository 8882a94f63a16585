//! The index contract consumed by the table
//!
//! An index maps fixed-length keys to record offsets. The table decides
//! which keys and offsets go in; the index decides how they are stored.

use crate::key::FixedLengthKey;

use super::errors::IndexResult;

/// One key/offset pair yielded by a range search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: FixedLengthKey,
    pub offset: u64,
}

/// Ordered key/offset enumerator returned by a range search
pub type IndexEnumerator = Box<dyn Iterator<Item = IndexEntry> + Send>;

/// Options for opening an index.
///
/// `cache_multiplier` is raised only for the duration of a rebuild or
/// defragment and passed back at 1 afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOpenOptions {
    /// Pages kept in memory
    pub cache_pages: usize,
    /// Factor applied to `cache_pages`
    pub cache_multiplier: usize,
}

impl IndexOpenOptions {
    pub fn new(cache_pages: usize) -> Self {
        Self {
            cache_pages,
            cache_multiplier: 1,
        }
    }

    /// Same options with a larger cache for bulk work
    pub fn for_rebuild(self, multiplier: usize) -> Self {
        Self {
            cache_multiplier: multiplier.max(1),
            ..self
        }
    }

    /// Effective page budget
    pub fn effective_pages(&self) -> usize {
        self.cache_pages.saturating_mul(self.cache_multiplier.max(1))
    }
}

impl Default for IndexOpenOptions {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A persisted key-to-offsets structure
pub trait Index: Send {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// A key of the shape this index stores
    fn key_template(&self) -> &FixedLengthKey;

    /// Load persisted state (first call) or apply new cache options
    fn open(&mut self, options: &IndexOpenOptions) -> IndexResult<()>;

    /// Persist pending changes
    fn flush(&mut self) -> IndexResult<()>;

    /// Flush and release resources
    fn shutdown(&mut self) -> IndexResult<()>;

    /// Remove every entry
    fn clear(&mut self) -> IndexResult<()>;

    /// Compact internal storage. `idle` allows a slower, thorough pass.
    fn defragment(&mut self, idle: bool) -> IndexResult<()>;

    fn add_entry(&mut self, key: FixedLengthKey, offset: u64) -> IndexResult<()>;

    /// Returns false if the pair was not present
    fn remove_entry(&mut self, key: &FixedLengthKey, offset: u64) -> IndexResult<bool>;

    /// Entries with `low <= key <= high`, ordered by key then offset
    fn search_for_range(&self, low: &FixedLengthKey, high: &FixedLengthKey) -> IndexEnumerator;

    /// Offsets of `search_for_range`, appended to `out`
    fn search_for_range_into(&self, low: &FixedLengthKey, high: &FixedLengthKey, out: &mut Vec<u64>) {
        out.extend(self.search_for_range(low, high).map(|e| e.offset));
    }

    /// Every offset in key order, appended to `out`
    fn get_all_offsets(&self, out: &mut Vec<u64>) {
        let template = self.key_template();
        self.search_for_range_into(&template.min_key(), &template.max_key(), out);
    }

    /// Minimum-sentinel instance of the second sub-key of a compound index
    fn search_key_second(&self) -> Option<FixedLengthKey> {
        self.key_template().second().map(|k| k.min_key())
    }

    /// Minimum-sentinel instance of the value sub-key of a
    /// compound-and-value index
    fn search_key_value(&self) -> Option<FixedLengthKey> {
        self.key_template().value().map(|k| k.min_key())
    }

    /// Number of live entries
    fn count(&self) -> u64;

    /// Pages currently resident
    fn loaded_pages(&self) -> u64;

    /// Page size in bytes
    fn page_size(&self) -> u32;
}
