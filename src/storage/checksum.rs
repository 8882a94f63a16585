//! CRC32 helpers
//!
//! - Index side files carry a CRC32 trailer over their body
//! - String index keys are the CRC32 of the lowercased string

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the computed checksum matches the expected checksum.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Case-insensitive hash of a string, used as its index key.
///
/// Strings that differ only in case hash to the same value.
pub fn case_insensitive_hash(value: &str) -> i32 {
    compute_checksum(value.to_lowercase().as_bytes()) as i32
}
