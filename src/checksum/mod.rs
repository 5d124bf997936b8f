//! Hashing primitives shared by the value log and the bloom filter.
//!
//! Two independent concerns live here:
//!
//! - **Record checksums** — every value-log frame carries a 16-bit checksum
//!   over `(key, value-length, value-bytes)`. The writer and the recovery
//!   scanner must agree byte-for-byte, so both call [`checksum16`].
//! - **Bloom probes** — the bloom filter derives its `k` probe positions
//!   from a seeded 128-bit non-cryptographic hash of the key, one seed per
//!   probe. See [`bloom_probe`].
//!
//! The checksum is the low half of a CRC-32 ([`crc32fast`]); the probe hash
//! is xxh3-128. Neither is collision-resistant in an adversarial sense —
//! the engine is the sole writer of its own files.


use crc32fast::Hasher as Crc32;
use xxhash_rust::xxh3::xxh3_128_with_seed;

/// Computes the 16-bit frame checksum over `key_le ‖ vlen_le ‖ value`.
///
/// Defined as the low 16 bits of the CRC-32 of the concatenation. Used by
/// the value-log append path and re-computed during tail recovery to
/// separate live records from torn or punched garbage.
pub fn checksum16(key: u64, vlen: u32, value: &[u8]) -> u16 {
    let mut hasher = Crc32::new();
    hasher.update(&key.to_le_bytes());
    hasher.update(&vlen.to_le_bytes());
    hasher.update(value);
    (hasher.finalize() & 0xFFFF) as u16
}

/// Computes the seeded 128-bit hash of a key.
///
/// Seeds `0..k` yield the bloom filter's `k` independent probe streams.
pub fn hash128(key: u64, seed: u64) -> u128 {
    xxh3_128_with_seed(&key.to_le_bytes(), seed)
}

/// Derives a bloom probe position for `key` under `seed`, reduced mod `m`.
///
/// Takes the low 64 bits of the seeded 128-bit hash.
pub fn bloom_probe(key: u64, seed: u64, m: usize) -> usize {
    (hash128(key, seed) as u64 % m as u64) as usize
}
