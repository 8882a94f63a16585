//! BLOB storage
//!
//! Records never hold BLOB bytes inline. A BLOB column stores an 8-byte
//! handle issued by a [`BlobStore`]; the store owns the bytes until the
//! handle is released.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for blob store operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Blob store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(BlobHandle),

    #[error("Blob store failure: {0}")]
    Backend(String),
}

impl BlobError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            BlobError::NotFound(_) => "AERO_BLOB_NOT_FOUND",
            BlobError::Backend(_) => "AERO_BLOB_BACKEND",
        }
    }
}

/// Handle to a stored BLOB. `BlobHandle::NONE` marks an empty field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlobHandle(pub u64);

impl BlobHandle {
    /// The empty handle
    pub const NONE: BlobHandle = BlobHandle(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob#{}", self.0)
    }
}

/// Backend trait for BLOB storage
pub trait BlobStore: Send + fmt::Debug {
    /// Store bytes and return a fresh handle
    fn put(&mut self, bytes: &[u8]) -> BlobResult<BlobHandle>;

    /// Read the bytes behind a handle
    fn get(&self, handle: BlobHandle) -> BlobResult<Vec<u8>>;

    /// Release a handle. Releasing `NONE` is a no-op.
    fn release(&mut self, handle: BlobHandle) -> BlobResult<()>;

    /// Number of live BLOBs
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    next: u64,
    blobs: HashMap<u64, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, bytes: &[u8]) -> BlobResult<BlobHandle> {
        self.next += 1;
        self.blobs.insert(self.next, bytes.to_vec());
        Ok(BlobHandle(self.next))
    }

    fn get(&self, handle: BlobHandle) -> BlobResult<Vec<u8>> {
        self.blobs
            .get(&handle.0)
            .cloned()
            .ok_or(BlobError::NotFound(handle))
    }

    fn release(&mut self, handle: BlobHandle) -> BlobResult<()> {
        if handle.is_none() {
            return Ok(());
        }
        self.blobs
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(BlobError::NotFound(handle))
    }

    fn len(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_release() {
        let mut store = MemoryBlobStore::new();
        let h = store.put(b"payload").unwrap();
        assert!(!h.is_none());
        assert_eq!(store.get(h).unwrap(), b"payload");
        store.release(h).unwrap();
        assert_eq!(store.get(h), Err(BlobError::NotFound(h)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_handles_are_unique() {
        let mut store = MemoryBlobStore::new();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"a").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_release_none_is_noop() {
        let mut store = MemoryBlobStore::new();
        store.release(BlobHandle::NONE).unwrap();
    }
}
