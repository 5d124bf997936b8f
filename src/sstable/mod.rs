//! Sorted String Table (SST) Module
//!
//! An SST is an **immutable**, fixed-budget index file mapping keys to
//! value locations in the shared value log. SSTs never hold value bytes —
//! compaction shuffles 16 KiB index files around while the values stay put.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER : 32 B] [BLOOM : 8192 B] [INDEX : 20 B × num_kv]
//! ```
//!
//! - **Header** — `seq ‖ num_kv ‖ min_key ‖ max_key`, u64 little-endian
//!   each. `seq` is the table's timestamp: the sole version tiebreaker
//!   between SSTs holding the same key.
//! - **Bloom** — the filter's cell array verbatim
//!   ([`crate::bloom::BLOOM_SIZE`] bytes).
//! - **Index** — strictly ascending `key(8) ‖ offset(8) ‖ vlen(4)` entries.
//!   `vlen == 0` marks a tombstone; its offset is a placeholder.
//!
//! Total file size never exceeds [`SST_SIZE`] (16 384 B), bounding each
//! table at [`SST_MAX_ENTRIES`] (408) entries.
//!
//! Files are named `<level>-<id>.sst` inside the data directory. Within a
//! level ids are contiguous from 0; a higher id is a newer table.
//!
//! # Guarantees
//!
//! - **Immutability** — a table's contents never change between creation
//!   and deletion; only its id (file name) may be rewritten by compaction.
//! - **No false negatives** — `query` consults the bloom filter; a `false`
//!   definitively excludes the key.
//! - **Bounded lookups** — `get`/`slot_of` binary-search the in-memory
//!   index; at most one value-log read follows.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::PathBuf,
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::bloom::{BLOOM_SIZE, BloomFilter};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::vlog::VLOG_PREFIX;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Maximum SST file size in bytes.
pub const SST_SIZE: usize = 16384;

/// Serialized header size in bytes.
pub const SST_HEADER_SIZE: usize = 32;

/// Serialized index entry size in bytes.
pub const SST_ENTRY_SIZE: usize = 20;

/// Maximum index entries per SST: `(16384 − 32 − 8192) / 20`.
pub const SST_MAX_ENTRIES: usize = (SST_SIZE - SST_HEADER_SIZE - BLOOM_SIZE) / SST_ENTRY_SIZE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SST operations (build, load, lookup).
#[derive(Debug, Error)]
pub enum SsTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The on-disk file violates the fixed layout.
    #[error("malformed SST: {0}")]
    Malformed(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// The 32-byte SST header.
#[derive(Debug, Clone, Copy)]
pub struct SstHeader {
    /// Timestamp of the table — the version tiebreaker across SSTs.
    pub seq: u64,

    /// Number of index entries.
    pub num_kv: u64,

    /// Smallest live key (u64::MAX when every entry is a tombstone).
    pub min_key: u64,

    /// Largest live key (0 when every entry is a tombstone).
    pub max_key: u64,
}

impl Encode for SstHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.seq.encode_to(buf);
        self.num_kv.encode_to(buf);
        self.min_key.encode_to(buf);
        self.max_key.encode_to(buf);
    }
}

impl Decode for SstHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (num_kv, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                seq,
                num_kv,
                min_key,
                max_key,
            },
            off,
        ))
    }
}

/// One 20-byte index entry: a key and where its value lives.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// The key.
    pub key: u64,

    /// Frame offset in the value log (placeholder for tombstones).
    pub offset: u64,

    /// Value length in bytes; 0 marks a tombstone.
    pub vlen: u32,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.key.encode_to(buf);
        self.offset.encode_to(buf);
        self.vlen.encode_to(buf);
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (vlen, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { key, offset, vlen }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Lookup results
// ------------------------------------------------------------------------------------------------

/// Result of a point lookup in a single SST.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The key maps to a live value.
    Hit(Vec<u8>),

    /// The key was deleted at this table's version.
    Tombstone,

    /// This table holds no entry for the key.
    Miss,
}

/// Where a key's value lives according to a single SST.
///
/// Used by GC to decide whether a value-log frame is the current version
/// of its key.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum KeySlot {
    /// No entry for the key.
    NotPresent,

    /// The key is present as a tombstone.
    Tombstone,

    /// The key's live value starts at this value-log offset.
    LiveAt(u64),
}

// ------------------------------------------------------------------------------------------------
// SsTable
// ------------------------------------------------------------------------------------------------

/// An immutable sorted table of key → value-location entries.
pub struct SsTable {
    /// Level this table belongs to.
    level: usize,

    /// Position within the level; contiguous from 0, higher = newer.
    id: usize,

    /// Parsed header.
    header: SstHeader,

    /// Bloom filter over every indexed key.
    bloom: BloomFilter,

    /// Index entries, strictly ascending by key.
    entries: Vec<IndexEntry>,

    /// Directory holding the `.sst` files.
    dir: PathBuf,

    /// Path of the shared value log (referenced by path only).
    vlog_path: PathBuf,
}

/// Returns the file name for a table at `level` with `id`.
pub fn sst_file_name(level: usize, id: usize) -> String {
    format!("{level}-{id}.sst")
}

/// Parses `<level>-<id>.sst` back into `(level, id)`.
pub fn parse_sst_file_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.strip_suffix(".sst")?;
    let (level, id) = stem.split_once('-')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}

impl SsTable {
    /// Assembles a table from already-sorted parts. Nothing touches disk
    /// until [`SsTable::write_disk`].
    pub fn new(
        header: SstHeader,
        level: usize,
        id: usize,
        bloom: BloomFilter,
        entries: Vec<IndexEntry>,
        dir: impl Into<PathBuf>,
        vlog_path: impl Into<PathBuf>,
    ) -> Self {
        debug_assert!(entries.len() <= SST_MAX_ENTRIES);
        debug_assert_eq!(header.num_kv as usize, entries.len());
        debug_assert!(entries.windows(2).all(|w| w[0].key < w[1].key));

        Self {
            level,
            id,
            header,
            bloom,
            entries,
            dir: dir.into(),
            vlog_path: vlog_path.into(),
        }
    }

    /// Loads a table from `<dir>/<level>-<id>.sst`.
    ///
    /// The file is memory-mapped, validated against the fixed layout, and
    /// parsed into owned header/bloom/index state; the mapping is dropped
    /// before returning.
    pub fn open(
        level: usize,
        id: usize,
        dir: impl Into<PathBuf>,
        vlog_path: impl Into<PathBuf>,
    ) -> Result<Self, SsTableError> {
        let dir = dir.into();
        let path = dir.join(sst_file_name(level, id));
        let file = File::open(&path)?;

        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SST_HEADER_SIZE + BLOOM_SIZE {
            return Err(SsTableError::Malformed(format!(
                "file {} is {} bytes, smaller than header + bloom",
                path.display(),
                mmap.len()
            )));
        }

        let (header, _) = SstHeader::decode_from(&mmap[..SST_HEADER_SIZE])?;

        let num_kv = header.num_kv as usize;
        let expected = SST_HEADER_SIZE + BLOOM_SIZE + num_kv * SST_ENTRY_SIZE;
        if num_kv > SST_MAX_ENTRIES || mmap.len() < expected {
            return Err(SsTableError::Malformed(format!(
                "file {} declares {} entries but holds {} bytes",
                path.display(),
                num_kv,
                mmap.len()
            )));
        }

        let bloom_bytes = &mmap[SST_HEADER_SIZE..SST_HEADER_SIZE + BLOOM_SIZE];
        let bloom = BloomFilter::from_bytes(bloom_bytes)
            .ok_or_else(|| SsTableError::Malformed("bloom block truncated".into()))?;

        let mut entries = Vec::with_capacity(num_kv);
        let mut off = SST_HEADER_SIZE + BLOOM_SIZE;
        for _ in 0..num_kv {
            let (entry, n) = IndexEntry::decode_from(&mmap[off..])?;
            off += n;
            entries.push(entry);
        }

        trace!(level, id, num_kv, seq = header.seq, "SST loaded");

        Ok(Self {
            level,
            id,
            header,
            bloom,
            entries,
            dir,
            vlog_path: vlog_path.into(),
        })
    }

    /// Serializes the table to `<dir>/<level>-<id>.sst` and fsyncs it.
    pub fn write_disk(&self) -> Result<(), SsTableError> {
        let mut buf = Vec::with_capacity(
            SST_HEADER_SIZE + BLOOM_SIZE + self.entries.len() * SST_ENTRY_SIZE,
        );
        self.header.encode_to(&mut buf);
        buf.extend_from_slice(self.bloom.as_bytes());
        for entry in &self.entries {
            entry.encode_to(&mut buf);
        }
        debug_assert!(buf.len() <= SST_SIZE);

        let path = self.file_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all_at(&buf, 0)?;
        file.sync_all()?;

        debug!(
            level = self.level,
            id = self.id,
            seq = self.header.seq,
            num_kv = self.header.num_kv,
            bytes = buf.len(),
            "SST written"
        );
        Ok(())
    }

    /// Consults the bloom filter: `false` definitively excludes the key.
    pub fn query(&self, key: u64) -> bool {
        self.bloom.query(key)
    }

    /// Point lookup.
    ///
    /// Binary-searches the index; on a hit with a live entry the value is
    /// fetched from the value log.
    pub fn get(&self, key: u64) -> Result<Lookup, SsTableError> {
        let Ok(idx) = self.entries.binary_search_by_key(&key, |e| e.key) else {
            return Ok(Lookup::Miss);
        };
        let entry = self.entries[idx];
        if entry.vlen == 0 {
            return Ok(Lookup::Tombstone);
        }
        Ok(Lookup::Hit(self.read_vlog_payload(entry.offset, entry.vlen)?))
    }

    /// Reports where the key's value lives, for GC liveness checks.
    pub fn slot_of(&self, key: u64) -> KeySlot {
        match self.entries.binary_search_by_key(&key, |e| e.key) {
            Err(_) => KeySlot::NotPresent,
            Ok(idx) => {
                let entry = self.entries[idx];
                if entry.vlen == 0 {
                    KeySlot::Tombstone
                } else {
                    KeySlot::LiveAt(entry.offset)
                }
            }
        }
    }

    /// Range scan over `[key_lo, key_hi]`, inclusive on both ends.
    ///
    /// Yields `(key, Some(value))` for live entries and `(key, None)` for
    /// tombstones, in ascending key order. Tombstones must flow to the
    /// caller — during a merged scan they shadow older live versions.
    pub fn scan(&self, key_lo: u64, key_hi: u64) -> Result<Vec<(u64, Option<Vec<u8>>)>, SsTableError> {
        if key_lo > key_hi {
            return Ok(Vec::new());
        }

        let start = self.entries.partition_point(|e| e.key < key_lo);
        let end = self.entries.partition_point(|e| e.key <= key_hi);

        let mut out = Vec::with_capacity(end - start);
        for entry in &self.entries[start..end] {
            if entry.vlen == 0 {
                out.push((entry.key, None));
            } else {
                out.push((
                    entry.key,
                    Some(self.read_vlog_payload(entry.offset, entry.vlen)?),
                ));
            }
        }
        Ok(out)
    }

    /// Renames the on-disk file to carry `new_id` and updates the table.
    ///
    /// Used by compaction when re-numbering a level's survivors.
    pub fn rename_id(&mut self, new_id: usize) -> Result<(), SsTableError> {
        if new_id == self.id {
            return Ok(());
        }
        let old_path = self.file_path();
        let new_path = self.dir.join(sst_file_name(self.level, new_id));
        fs::rename(&old_path, &new_path)?;
        trace!(
            level = self.level,
            old_id = self.id,
            new_id,
            "SST renamed"
        );
        self.id = new_id;
        Ok(())
    }

    /// Removes the on-disk file. The in-memory table should be dropped
    /// right after.
    pub fn delete_disk(&self) -> Result<(), SsTableError> {
        fs::remove_file(self.file_path())?;
        trace!(level = self.level, id = self.id, "SST deleted");
        Ok(())
    }

    /// Path of the backing file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(sst_file_name(self.level, self.id))
    }

    /// The table's timestamp.
    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// Number of index entries.
    pub fn num_kv(&self) -> u64 {
        self.header.num_kv
    }

    /// Smallest live key.
    pub fn min_key(&self) -> u64 {
        self.header.min_key
    }

    /// Largest live key.
    pub fn max_key(&self) -> u64 {
        self.header.max_key
    }

    /// Level this table belongs to.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Position within the level.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The index entries, ascending by key.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Reads a frame payload from the value log by raw position.
    ///
    /// Deliberately does not validate the frame: an entry may point into a
    /// hole-punched region when a newer version of its key exists
    /// elsewhere, and such reads are always shadowed by that newer version
    /// before reaching the caller.
    fn read_vlog_payload(&self, offset: u64, vlen: u32) -> Result<Vec<u8>, SsTableError> {
        let file = File::open(&self.vlog_path)?;
        let mut frame = vec![0u8; (VLOG_PREFIX + vlen as u64) as usize];
        file.read_exact_at(&mut frame, offset)?;
        Ok(frame.split_off(VLOG_PREFIX as usize))
    }
}
