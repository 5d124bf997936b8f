//! Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine: a
//! **probabilistic multi-level ordered list** (skip list) over `u64` keys.
//!
//! ## Design Invariants
//!
//! - Keys are unique; a `put` of an existing key overwrites its value in
//!   place rather than inserting a new version.
//! - Deletes insert a tagged [`Value::Tombstone`] — never a sentinel byte
//!   string — so no legitimate value can collide with the marker.
//! - Bottom-level iteration yields strictly ascending keys; every tower
//!   has height ≥ 1, so the bottom level contains every key.
//! - Nodes live in a contiguous arena indexed by position; towers hold
//!   arena indices, not pointers, so teardown is a single `Vec` drop.
//!
//! ## Sizing
//!
//! [`MemTable::size_bytes`] reports the size of the SST this table would
//! flush into (`32 + 8192 + 20·n`), which is what the engine compares
//! against the 16 KiB SST budget — the buffer is full exactly when the
//! flushed table would be.
//!
//! ## Flush Semantics
//!
//! [`MemTable::flush_into_sst`] walks the bottom level in ascending key
//! order. Each live value is appended to the value log and its returned
//! offset captured **before** the next append; tombstones are recorded
//! with `vlen = 0` and the pre-append end offset as a placeholder. The
//! value log is fsynced before the SST file is written, so a durable SST
//! never references bytes the log could lose.


use std::path::Path;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use thiserror::Error;
use tracing::{debug, trace};

use crate::bloom::{BLOOM_SIZE, BloomFilter};
use crate::sstable::{
    IndexEntry, SST_ENTRY_SIZE, SST_HEADER_SIZE, SsTable, SsTableError, SstHeader,
};
use crate::vlog::{VLog, VlogError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Maximum tower height.
pub const MAX_LEVELS: usize = 16;

/// Probability of promoting a tower one level higher.
pub const PROMOTE_P: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations (only the flush path touches
/// disk; pure in-memory operations are infallible).
#[derive(Debug, Error)]
pub enum MemTableError {
    /// Value-log append or sync failure during flush.
    #[error("value log error: {0}")]
    Vlog(#[from] VlogError),

    /// SST write failure during flush.
    #[error("SST error: {0}")]
    SsTable(#[from] SsTableError),
}

// ------------------------------------------------------------------------------------------------
// Value representation
// ------------------------------------------------------------------------------------------------

/// A stored value or a deletion marker.
///
/// The tagged representation keeps delete markers out of the value space
/// entirely; externally a tombstoned key simply reads as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A live value.
    Live(Vec<u8>),

    /// The key has been deleted at this version.
    Tombstone,
}

impl Value {
    /// Returns `true` for the deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }
}

// ------------------------------------------------------------------------------------------------
// Skip list internals
// ------------------------------------------------------------------------------------------------

/// One arena slot: a key, its value, and the tower of successor indices.
struct Node {
    key: u64,
    value: Value,
    /// `next[l]` is the arena index of the successor at level `l`;
    /// the tower height is `next.len()`.
    next: Vec<Option<usize>>,
}

/// The in-memory ordered write buffer.
pub struct MemTable {
    /// Node storage; never shrinks until the table is dropped.
    arena: Vec<Node>,

    /// Successor of the virtual head at each level.
    head: [Option<usize>; MAX_LEVELS],

    /// Highest tower height currently in use.
    height: usize,

    /// Number of distinct keys.
    num_kv: usize,

    /// Tower-height sampler.
    rng: SmallRng,
}

impl MemTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            head: [None; MAX_LEVELS],
            height: 1,
            num_kv: 0,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Samples a tower height: `1 + Geom(p)`, capped at [`MAX_LEVELS`].
    fn sample_height(&mut self) -> usize {
        use rand::Rng;
        let mut height = 1;
        while height < MAX_LEVELS && self.rng.random_bool(PROMOTE_P) {
            height += 1;
        }
        height
    }

    /// Successor of `node` (or of the head when `None`) at `level`.
    fn successor(&self, node: Option<usize>, level: usize) -> Option<usize> {
        match node {
            None => self.head[level],
            Some(idx) => self.arena[idx].next[level],
        }
    }

    /// Top-down search for `key`.
    ///
    /// Returns the predecessor at every level (`None` = virtual head) and
    /// the arena index of the key's node if it exists.
    fn find(&self, key: u64) -> ([Option<usize>; MAX_LEVELS], Option<usize>) {
        let mut update = [None; MAX_LEVELS];
        let mut prev: Option<usize> = None;

        for level in (0..self.height).rev() {
            while let Some(next) = self.successor(prev, level) {
                if self.arena[next].key < key {
                    prev = Some(next);
                } else {
                    break;
                }
            }
            update[level] = prev;
        }

        let found = self
            .successor(prev, 0)
            .filter(|&idx| self.arena[idx].key == key);
        (update, found)
    }

    /// Inserts or overwrites a key.
    ///
    /// An existing key is overwritten in place; a new key gets a tower of
    /// sampled height linked under its predecessors.
    pub fn put(&mut self, key: u64, value: Value) {
        let (update, found) = self.find(key);

        if let Some(idx) = found {
            self.arena[idx].value = value;
            trace!(key, "memtable overwrite");
            return;
        }

        let height = self.sample_height();
        if height > self.height {
            self.height = height;
        }

        let node_idx = self.arena.len();
        let mut next = vec![None; height];
        for (level, slot) in next.iter_mut().enumerate() {
            match update[level] {
                None => {
                    *slot = self.head[level];
                    self.head[level] = Some(node_idx);
                }
                Some(prev) => {
                    *slot = self.arena[prev].next[level];
                    self.arena[prev].next[level] = Some(node_idx);
                }
            }
        }

        self.arena.push(Node { key, value, next });
        self.num_kv += 1;
        trace!(key, height, "memtable insert");
    }

    /// Inserts a deletion marker for `key`.
    pub fn del(&mut self, key: u64) {
        self.put(key, Value::Tombstone);
    }

    /// Looks up `key`, returning the stored value or tombstone marker.
    pub fn get(&self, key: u64) -> Option<&Value> {
        let (_, found) = self.find(key);
        found.map(|idx| &self.arena[idx].value)
    }

    /// Ascending scan over `[key_lo, key_hi]`, inclusive on both ends.
    ///
    /// Tombstones are included — callers merging across layers need them
    /// to shadow older versions.
    pub fn scan(&self, key_lo: u64, key_hi: u64) -> Vec<(u64, Value)> {
        let mut out = Vec::new();
        if key_lo > key_hi {
            return out;
        }

        let (update, _) = self.find(key_lo);
        let mut cursor = self.successor(update[0], 0);
        while let Some(idx) = cursor {
            let node = &self.arena[idx];
            if node.key > key_hi {
                break;
            }
            out.push((node.key, node.value.clone()));
            cursor = node.next[0];
        }
        out
    }

    /// Ascending iteration over every entry (bottom level walk).
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Value)> {
        let mut cursor = self.head[0];
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.arena[idx];
            cursor = node.next[0];
            Some((node.key, &node.value))
        })
    }

    /// Number of distinct keys.
    pub fn num_entries(&self) -> usize {
        self.num_kv
    }

    /// Returns `true` when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.num_kv == 0
    }

    /// Size of the SST this table would flush into.
    pub fn size_bytes(&self) -> usize {
        SST_HEADER_SIZE + BLOOM_SIZE + self.num_kv * SST_ENTRY_SIZE
    }

    /// Flushes the table into a new SST at `<dir>/<level>-<id>.sst`.
    ///
    /// Walks entries in ascending key order, appending live values to the
    /// value log; see the module docs for the exact offset-capture and
    /// fsync contract. Does not consume or clear the table — the caller
    /// swaps in a fresh one.
    pub fn flush_into_sst(
        &self,
        level: usize,
        id: usize,
        seq: u64,
        dir: &Path,
        vlog: &mut VLog,
    ) -> Result<SsTable, MemTableError> {
        let mut bloom = BloomFilter::new();
        let mut entries = Vec::with_capacity(self.num_kv);
        let mut min_key = u64::MAX;
        let mut max_key = 0u64;

        for (key, value) in self.iter() {
            bloom.insert(key);
            let placeholder = vlog.end_offset();
            match value {
                Value::Live(bytes) => {
                    let offset = vlog.append(key, bytes)?;
                    min_key = min_key.min(key);
                    max_key = max_key.max(key);
                    entries.push(IndexEntry {
                        key,
                        offset,
                        vlen: bytes.len() as u32,
                    });
                }
                Value::Tombstone => {
                    entries.push(IndexEntry {
                        key,
                        offset: placeholder,
                        vlen: 0,
                    });
                }
            }
        }

        // The SST must never reference bytes the log could lose.
        vlog.sync()?;

        let header = SstHeader {
            seq,
            num_kv: entries.len() as u64,
            min_key,
            max_key,
        };
        let sst = SsTable::new(header, level, id, bloom, entries, dir, vlog.path());
        sst.write_disk()?;

        debug!(
            level,
            id,
            seq,
            num_kv = self.num_kv,
            "memtable flushed to SST"
        );
        Ok(sst)
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
