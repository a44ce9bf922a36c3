//! Canonical key hashing for partition placement.
//!
//! FNV-1a is the single source of truth for key-mode placement so that equal
//! keys always land on equal partition indices for a fixed count.

/// 32-bit FNV-1a.
///
/// # Example
/// ```
/// # use pageflow_core::hash::fnv1a_32;
/// assert_eq!(fnv1a_32(b""), 0x811c9dc5);
/// ```
pub fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Map a key to a partition index in `[0, count)`.
///
/// `count` must be non-zero; callers validate it at configuration time.
#[inline]
pub fn partition_for_key(key: &str, count: usize) -> usize {
    fnv1a_32(key.as_bytes()) as usize % count
}
