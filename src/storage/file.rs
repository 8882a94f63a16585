//! Positioned I/O over the record file
//!
//! Unlike an append-only log, the record file is rewritten in place:
//! marker flips on delete, in-place updates on fixed-size tables, and
//! length patches during repair. All access goes through explicit offsets.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::marker::RecordMarker;

/// Chunk size used when searching forward for a byte pattern
const SEARCH_CHUNK: usize = 64 * 1024;

/// The data file of one table
#[derive(Debug)]
pub struct RecordFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl RecordFile {
    /// Opens or creates the record file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A buffered reader positioned at `offset`.
    pub fn reader_at(&self, offset: u64) -> StorageResult<RecordReader<'_>> {
        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(offset))?;
        Ok(RecordReader {
            inner: BufReader::new(handle),
            position: offset,
        })
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let end = offset + buf.len() as u64;
        if end > self.len {
            return Err(StorageError::bad_indexes(
                offset,
                format!("read of {} bytes past end of file ({})", buf.len(), self.len),
            ));
        }
        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buf)?;
        Ok(())
    }

    /// Reads the raw marker byte at `offset`.
    pub fn read_marker_byte(&self, offset: u64) -> StorageResult<u8> {
        let mut byte = [0u8; 1];
        self.read_at(offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Reads and parses the marker at `offset`.
    pub fn read_marker(&self, offset: u64) -> StorageResult<RecordMarker> {
        let byte = self.read_marker_byte(offset)?;
        RecordMarker::from_byte(byte).ok_or_else(|| {
            StorageError::bad_indexes(offset, format!("unexpected marker byte 0x{:02x}", byte))
        })
    }

    /// Overwrites the marker at `offset`.
    pub fn write_marker(&mut self, offset: u64, marker: RecordMarker) -> StorageResult<()> {
        if offset >= self.len {
            return Err(StorageError::bad_indexes(offset, "marker write past end of file"));
        }
        self.write_at(offset, &[marker.to_byte()])
    }

    /// Writes `bytes` at `offset`, extending the file if needed.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.len = self.len.max(offset + bytes.len() as u64);
        Ok(())
    }

    /// Appends `bytes` and returns the offset they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        self.write_at(offset, bytes)?;
        Ok(offset)
    }

    /// Cuts the file at `len` bytes.
    pub fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Flushes written data to disk.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Finds the first occurrence of `pattern` at or after `from`.
    ///
    /// Returns the offset of the first byte of the match, or `None` if the
    /// pattern does not occur before end of file.
    pub fn find_pattern(&self, from: u64, pattern: &[u8]) -> StorageResult<Option<u64>> {
        if pattern.is_empty() || from >= self.len {
            return Ok(None);
        }
        let overlap = pattern.len() - 1;
        let mut chunk_start = from;
        let mut buf = vec![0u8; SEARCH_CHUNK];

        while chunk_start < self.len {
            let want = ((self.len - chunk_start) as usize).min(SEARCH_CHUNK);
            self.read_at(chunk_start, &mut buf[..want])?;
            if let Some(pos) = buf[..want].windows(pattern.len()).position(|w| w == pattern) {
                return Ok(Some(chunk_start + pos as u64));
            }
            if want < SEARCH_CHUNK {
                break;
            }
            chunk_start += (want - overlap) as u64;
        }
        Ok(None)
    }
}

/// A buffered reader that tracks its absolute file position
pub struct RecordReader<'a> {
    inner: BufReader<&'a File>,
    position: u64,
}

impl RecordReader<'_> {
    /// Absolute offset of the next byte to be read
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for RecordReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}
