//! BTreeMap-backed index
//!
//! Entries live in a `BTreeMap<FixedLengthKey, Vec<u64>>` with offsets
//! sorted ascending per key. A persistent index mirrors the map into a side
//! file on flush:
//!
//! ```text
//! +---------+-----------+-------------+------------------------------+-------+
//! | "AIDX"  | key size  | entry count | (key bytes, offset u64) * n  | CRC32 |
//! | 4 bytes | u32 LE    | u64 LE      |                              | u32   |
//! +---------+-----------+-------------+------------------------------+-------+
//! ```
//!
//! The side file is written to a temporary path and renamed into place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::key::FixedLengthKey;
use crate::storage::{compute_checksum, verify_checksum};

use super::contract::{Index, IndexEntry, IndexEnumerator, IndexOpenOptions};
use super::errors::{IndexError, IndexResult};

const MAGIC: &[u8; 4] = b"AIDX";
const HEADER_LEN: usize = 4 + 4 + 8;
const TRAILER_LEN: usize = 4;
const PAGE_SIZE: u32 = 4096;

/// An ordered index, optionally persisted to a side file
#[derive(Debug)]
pub struct BTreeIndex {
    name: String,
    path: Option<PathBuf>,
    template: FixedLengthKey,
    tree: BTreeMap<FixedLengthKey, Vec<u64>>,
    count: u64,
    dirty: bool,
    opened: bool,
    options: IndexOpenOptions,
}

impl BTreeIndex {
    /// An index that lives only in memory
    pub fn in_memory(name: impl Into<String>, template: FixedLengthKey) -> Self {
        Self {
            name: name.into(),
            path: None,
            template,
            tree: BTreeMap::new(),
            count: 0,
            dirty: false,
            opened: false,
            options: IndexOpenOptions::default(),
        }
    }

    /// An index persisted at `path`
    pub fn persistent(name: impl Into<String>, template: FixedLengthKey, path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            ..Self::in_memory(name, template)
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the number of distinct keys
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    fn entry_size(&self) -> usize {
        self.template.key_size() + 8
    }

    fn ensure_open(&self) -> IndexResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(IndexError::not_open(&self.name))
        }
    }

    fn check_shape(&self, key: &FixedLengthKey) -> IndexResult<()> {
        if self.template.same_shape(key) {
            Ok(())
        } else {
            Err(IndexError::key_mismatch(&self.name, key))
        }
    }

    fn load(&mut self, path: &Path) -> IndexResult<()> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.tree.clear();
                self.count = 0;
                return Ok(());
            }
            Err(e) => return Err(IndexError::io(&self.name, e)),
        };

        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(IndexError::corrupted(&self.name, "side file shorter than header"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(trailer);
        if !verify_checksum(body, u32::from_le_bytes(crc)) {
            return Err(IndexError::corrupted(&self.name, "checksum mismatch"));
        }
        if &body[..4] != MAGIC {
            return Err(IndexError::corrupted(&self.name, "bad magic"));
        }

        let mut u32_buf = [0u8; 4];
        u32_buf.copy_from_slice(&body[4..8]);
        let key_size = u32::from_le_bytes(u32_buf) as usize;
        if key_size != self.template.key_size() {
            return Err(IndexError::corrupted(
                &self.name,
                format!("key size {} does not match template size {}", key_size, self.template.key_size()),
            ));
        }
        let mut u64_buf = [0u8; 8];
        u64_buf.copy_from_slice(&body[8..16]);
        let count = u64::from_le_bytes(u64_buf);

        let entries = &body[HEADER_LEN..];
        if entries.len() as u64 != count.saturating_mul(self.entry_size() as u64) {
            return Err(IndexError::corrupted(&self.name, "entry count does not match file length"));
        }

        let mut tree: BTreeMap<FixedLengthKey, Vec<u64>> = BTreeMap::new();
        let mut cursor = Cursor::new(entries);
        for _ in 0..count {
            let key = self
                .template
                .read_like(&mut cursor)
                .map_err(|e| IndexError::io(&self.name, e))?;
            let mut off = [0u8; 8];
            std::io::Read::read_exact(&mut cursor, &mut off).map_err(|e| IndexError::io(&self.name, e))?;
            let offsets = tree.entry(key).or_default();
            let offset = u64::from_le_bytes(off);
            if let Err(pos) = offsets.binary_search(&offset) {
                offsets.insert(pos, offset);
            }
        }

        self.count = tree.values().map(|v| v.len() as u64).sum();
        self.tree = tree;
        Ok(())
    }

    fn serialize(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.count as usize * self.entry_size() + TRAILER_LEN);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(self.template.key_size() as u32).to_le_bytes());
        buf.extend_from_slice(&self.count.to_le_bytes());
        for (key, offsets) in &self.tree {
            for offset in offsets {
                key.write(&mut buf)?;
                buf.extend_from_slice(&offset.to_le_bytes());
            }
        }
        let crc = compute_checksum(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn persist(&self, path: &Path) -> IndexResult<()> {
        let bytes = self.serialize().map_err(|e| IndexError::io(&self.name, e))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            IndexError::io(&self.name, e)
        })
    }
}

impl Index for BTreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_template(&self) -> &FixedLengthKey {
        &self.template
    }

    fn open(&mut self, options: &IndexOpenOptions) -> IndexResult<()> {
        self.options = *options;
        if self.opened {
            return Ok(());
        }
        if let Some(path) = self.path.clone() {
            self.load(&path)?;
        }
        self.dirty = false;
        self.opened = true;
        Ok(())
    }

    fn flush(&mut self) -> IndexResult<()> {
        self.ensure_open()?;
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = self.path.clone() {
            self.persist(&path)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn shutdown(&mut self) -> IndexResult<()> {
        if !self.opened {
            return Ok(());
        }
        self.flush()?;
        self.opened = false;
        Ok(())
    }

    fn clear(&mut self) -> IndexResult<()> {
        self.ensure_open()?;
        self.tree.clear();
        self.count = 0;
        self.dirty = true;
        Ok(())
    }

    fn defragment(&mut self, idle: bool) -> IndexResult<()> {
        self.ensure_open()?;
        self.tree.retain(|_, offsets| !offsets.is_empty());
        if idle {
            for offsets in self.tree.values_mut() {
                offsets.shrink_to_fit();
            }
        }
        Ok(())
    }

    fn add_entry(&mut self, key: FixedLengthKey, offset: u64) -> IndexResult<()> {
        self.ensure_open()?;
        self.check_shape(&key)?;
        let offsets = self.tree.entry(key).or_default();
        if let Err(pos) = offsets.binary_search(&offset) {
            offsets.insert(pos, offset);
            self.count += 1;
            self.dirty = true;
        }
        Ok(())
    }

    fn remove_entry(&mut self, key: &FixedLengthKey, offset: u64) -> IndexResult<bool> {
        self.ensure_open()?;
        self.check_shape(key)?;
        let Some(offsets) = self.tree.get_mut(key) else {
            return Ok(false);
        };
        let removed = match offsets.binary_search(&offset) {
            Ok(pos) => {
                offsets.remove(pos);
                true
            }
            Err(_) => false,
        };
        if offsets.is_empty() {
            self.tree.remove(key);
        }
        if removed {
            self.count -= 1;
            self.dirty = true;
        }
        Ok(removed)
    }

    fn search_for_range(&self, low: &FixedLengthKey, high: &FixedLengthKey) -> IndexEnumerator {
        if low > high {
            return Box::new(std::iter::empty());
        }
        let entries: Vec<IndexEntry> = self
            .tree
            .range((Bound::Included(low), Bound::Included(high)))
            .flat_map(|(key, offsets)| {
                offsets.iter().map(move |&offset| IndexEntry {
                    key: key.clone(),
                    offset,
                })
            })
            .collect();
        Box::new(entries.into_iter())
    }

    fn search_for_range_into(&self, low: &FixedLengthKey, high: &FixedLengthKey, out: &mut Vec<u64>) {
        if low > high {
            return;
        }
        for (_, offsets) in self.tree.range((Bound::Included(low), Bound::Included(high))) {
            out.extend_from_slice(offsets);
        }
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn loaded_pages(&self) -> u64 {
        if !self.opened {
            return 0;
        }
        let bytes = self.count * self.entry_size() as u64;
        let pages = bytes.div_ceil(u64::from(PAGE_SIZE));
        pages.min(self.options.effective_pages() as u64)
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }
}
