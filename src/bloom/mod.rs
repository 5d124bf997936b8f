//! Fixed-size bloom filter embedded in every SST.
//!
//! The filter is a byte array of [`BLOOM_SIZE`] cells — one byte per bit,
//! non-zero meaning set — probed at [`BLOOM_PROBES`] positions derived from
//! a seeded 128-bit hash of the key (seed `0..k`, see
//! [`crate::checksum::bloom_probe`]).
//!
//! The serialized form is the cell array **verbatim**: exactly
//! `BLOOM_SIZE` bytes, written between the SST header and the index block.
//! False negatives are impossible; false positives are filtered out by the
//! SST's binary-searched index.


use crate::checksum::bloom_probe;

/// Number of filter cells (and serialized bytes) per SST.
pub const BLOOM_SIZE: usize = 8192;

/// Number of probe positions per key.
pub const BLOOM_PROBES: u64 = 3;

/// A fixed-size bloom filter over `u64` keys.
#[derive(Clone)]
pub struct BloomFilter {
    /// Cell array, one byte per bit. Non-zero ⇒ set.
    cells: Vec<u8>,
}

impl BloomFilter {
    /// Creates an empty filter with all cells clear.
    pub fn new() -> Self {
        Self {
            cells: vec![0u8; BLOOM_SIZE],
        }
    }

    /// Sets the `k` probe positions for `key`.
    pub fn insert(&mut self, key: u64) {
        for seed in 0..BLOOM_PROBES {
            let pos = bloom_probe(key, seed, BLOOM_SIZE);
            self.cells[pos] = 1;
        }
    }

    /// Returns `true` iff all `k` probe positions for `key` are set.
    ///
    /// A `false` answer is definitive; a `true` answer may be a false
    /// positive.
    pub fn query(&self, key: u64) -> bool {
        (0..BLOOM_PROBES).all(|seed| self.cells[bloom_probe(key, seed, BLOOM_SIZE)] != 0)
    }

    /// Returns the serialized cell array (exactly [`BLOOM_SIZE`] bytes).
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    /// Reconstructs a filter from its serialized cell array.
    ///
    /// Returns `None` if `bytes` is not exactly [`BLOOM_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BLOOM_SIZE {
            return None;
        }
        Some(Self {
            cells: bytes.to_vec(),
        })
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}
