//! LSM Storage Engine
//!
//! The top-level coordinator owning the memtable, the leveled SSTs, and
//! the value log. Implements the full public contract: open with crash
//! recovery, put, get, del, ordered scan, online value-log GC, reset, and
//! close-with-flush.
//!
//! ## Write path
//!
//! `put` first makes room: if the memtable has reached the size of a full
//! SST it is flushed to level 0 (values appended to the value log, index
//! written as a fresh table), then every level over its `2^(L+2)` budget
//! is compacted in ascending order, and only then is the new entry
//! inserted. The memtable therefore never exceeds one table's worth of
//! entries.
//!
//! ## Read path
//!
//! `get` consults the memtable, then walks levels in ascending order and
//! tables within a level from highest id to lowest — newest first at every
//! step. The first live value wins; the first tombstone ends the search as
//! "not found". Bloom filters gate every table probe.
//!
//! `scan` merges the memtable stream and every table's stream through a
//! min-heap keyed by `(key, source precedence)`; for each distinct key the
//! highest-precedence version is taken, and a tombstone suppresses the key
//! outright — older live versions beneath it never surface.
//!
//! ## Durability
//!
//! Durability is at SST-flush granularity. The value log is fsynced before
//! a referencing table is written, and the table is fsynced after its
//! write; an append that no table references yet may be lost on a crash
//! and is excluded by the value log's recovery scan on the next open.
//!
//! ## Concurrency
//!
//! Single-threaded by contract: the engine assumes exclusive access, and
//! every operation runs to completion on the calling thread.

#[cfg(test)]
mod tests;

use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::compaction::{self, CompactionError};
use crate::memtable::{MemTable, MemTableError, Value};
use crate::sstable::{
    KeySlot, Lookup, SST_SIZE, SsTable, SsTableError, parse_sst_file_name,
};
use crate::vlog::{VLog, VlogError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable flush path.
    #[error("memtable error: {0}")]
    MemTable(#[from] MemTableError),

    /// Error originating from the SST subsystem.
    #[error("SST error: {0}")]
    SsTable(#[from] SsTableError),

    /// Error originating from the value log.
    #[error("value log error: {0}")]
    Vlog(#[from] VlogError),

    /// Error originating from compaction.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Snapshot of engine state returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Number of SSTs per level, shallowest first.
    pub level_sizes: Vec<usize>,

    /// Entries currently buffered in the memtable.
    pub mem_entries: usize,

    /// Value-log end offset.
    pub vlog_head: u64,

    /// First live value-log byte.
    pub vlog_tail: u64,

    /// Next timestamp to be assigned to a flushed SST.
    pub next_seq: u64,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine handle. See the [module docs](self) for semantics.
pub struct Engine {
    /// In-memory write buffer.
    mem: MemTable,

    /// Leveled SSTs; `levels[l]` is ordered by id ascending.
    levels: Vec<Vec<SsTable>>,

    /// Directory holding the `.sst` files.
    dir: PathBuf,

    /// Path of the value log (kept for reset).
    vlog_path: PathBuf,

    /// The shared value log.
    vlog: VLog,

    /// Timestamp for the next flushed SST.
    next_seq: u64,

    /// Set once `close` has flushed residual state.
    closed: bool,
}

impl Engine {
    /// Opens (or creates) an engine with its data directory and value log.
    ///
    /// Recovery on an existing store:
    /// 1. The value log's live region is re-established (checksum scan
    ///    from the first allocated byte).
    /// 2. Every `<level>-<id>.sst` in the directory is loaded, grouped by
    ///    level, and ordered by id.
    /// 3. `next_seq` resumes one past the highest timestamp on disk.
    pub fn open(
        dir_path: impl AsRef<Path>,
        vlog_path: impl AsRef<Path>,
    ) -> Result<Self, EngineError> {
        let dir = dir_path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let vlog_path = vlog_path.as_ref().to_path_buf();
        let vlog = VLog::open(&vlog_path)?;

        // Discover SSTs on disk.
        let mut found: Vec<(usize, usize)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((level, id)) = parse_sst_file_name(name) {
                found.push((level, id));
            }
        }
        found.sort_unstable();

        let mut levels: Vec<Vec<SsTable>> = vec![Vec::new()];
        let mut next_seq = 0u64;
        for (level, id) in found {
            while levels.len() <= level {
                levels.push(Vec::new());
            }
            let table = SsTable::open(level, id, &dir, &vlog_path)?;
            next_seq = next_seq.max(table.seq() + 1);
            levels[level].push(table);
        }

        info!(
            dir = %dir.display(),
            tables = levels.iter().map(Vec::len).sum::<usize>(),
            next_seq,
            "engine opened"
        );

        Ok(Self {
            mem: MemTable::new(),
            levels,
            dir,
            vlog_path,
            vlog,
            next_seq,
            closed: false,
        })
    }

    /// Inserts or updates a key-value pair.
    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<(), EngineError> {
        self.insert(key, Value::Live(value))
    }

    /// Returns the value for `key`, or `None` when absent or deleted.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, EngineError> {
        // Memtable holds the newest version of anything it contains.
        match self.mem.get(key) {
            Some(Value::Live(value)) => return Ok(Some(value.clone())),
            Some(Value::Tombstone) => return Ok(None),
            None => {}
        }

        // Levels ascending, tables newest-first within each level.
        for level in &self.levels {
            for table in level.iter().rev() {
                if !table.query(key) {
                    continue;
                }
                match table.get(key)? {
                    Lookup::Hit(value) => return Ok(Some(value)),
                    Lookup::Tombstone => return Ok(None),
                    Lookup::Miss => {}
                }
            }
        }
        Ok(None)
    }

    /// Deletes `key` if it is live.
    ///
    /// Returns `false` when the key was absent or already deleted; the
    /// tombstone is only recorded for live keys.
    pub fn del(&mut self, key: u64) -> Result<bool, EngineError> {
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        self.insert(key, Value::Tombstone)?;
        Ok(true)
    }

    /// Ordered scan of all live pairs in `[key_lo, key_hi]`, both ends
    /// inclusive.
    pub fn scan(&self, key_lo: u64, key_hi: u64) -> Result<Vec<(u64, Vec<u8>)>, EngineError> {
        if key_lo > key_hi {
            return Ok(Vec::new());
        }

        // Streams in precedence order: the memtable, then levels ascending
        // with ids descending — index 0 is the newest source.
        let mut streams: Vec<Vec<(u64, Option<Vec<u8>>)>> = Vec::new();
        streams.push(
            self.mem
                .scan(key_lo, key_hi)
                .into_iter()
                .map(|(k, v)| match v {
                    Value::Live(bytes) => (k, Some(bytes)),
                    Value::Tombstone => (k, None),
                })
                .collect(),
        );
        for level in &self.levels {
            for table in level.iter().rev() {
                streams.push(table.scan(key_lo, key_hi)?);
            }
        }

        // Min-heap on (key, precedence): for equal keys the newest source
        // pops first.
        let mut heap: BinaryHeap<std::cmp::Reverse<(u64, usize)>> = BinaryHeap::new();
        let mut cursors = vec![0usize; streams.len()];
        for (rank, stream) in streams.iter().enumerate() {
            if let Some(&(key, _)) = stream.first() {
                heap.push(std::cmp::Reverse((key, rank)));
                cursors[rank] = 1;
            }
        }

        let mut out: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut last_key: Option<u64> = None;
        while let Some(std::cmp::Reverse((key, rank))) = heap.pop() {
            let (_, value) = &streams[rank][cursors[rank] - 1];

            // First sighting of a key decides it; a tombstone suppresses
            // every older version beneath it.
            if last_key != Some(key) {
                last_key = Some(key);
                if let Some(bytes) = value {
                    out.push((key, bytes.clone()));
                }
            }

            if let Some(&(next_key, _)) = streams[rank].get(cursors[rank]) {
                cursors[rank] += 1;
                heap.push(std::cmp::Reverse((next_key, rank)));
            }
        }
        Ok(out)
    }

    /// Reclaims at least `chunk_size` bytes from the head of the live
    /// value-log region.
    ///
    /// Walks frames from the tail: a frame is still live iff the memtable
    /// does not hold its key and the newest table containing the key
    /// points exactly at this frame. Live values are re-inserted through
    /// the normal write path (which may flush mid-walk); afterwards the
    /// buffered re-inserts are flushed so the relocations are durable, and
    /// the scanned prefix is hole-punched.
    pub fn gc(&mut self, chunk_size: u64) -> Result<(), EngineError> {
        let tail = self.vlog.tail();
        let mut read_bytes = 0u64;

        while read_bytes < chunk_size {
            let offset = tail + read_bytes;
            let Some(record) = self.vlog.record_at(offset)? else {
                break;
            };
            let frame_len = record.frame_len();

            if self.frame_is_live(record.key, offset) {
                self.insert(record.key, Value::Live(record.value))?;
            }
            read_bytes += frame_len;
        }

        if read_bytes == 0 {
            debug!(tail, "gc found nothing to reclaim");
            return Ok(());
        }

        // Relocated values must be durable before their old frames vanish.
        if !self.mem.is_empty() {
            self.flush_mem()?;
        }
        self.compact_overflowing()?;

        self.vlog.punch_hole(tail, read_bytes)?;
        info!(tail, reclaimed = read_bytes, "gc reclaimed value-log prefix");
        Ok(())
    }

    /// Drops every table, the value log, and anything else in the data
    /// directory, returning the engine to its freshly-created state.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        for level in &mut self.levels {
            for table in level.drain(..) {
                table.delete_disk()?;
            }
        }
        self.levels = vec![Vec::new()];

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        if self.vlog_path.exists() {
            fs::remove_file(&self.vlog_path)?;
        }

        self.mem = MemTable::new();
        self.vlog = VLog::open(&self.vlog_path)?;
        self.next_seq = 0;

        info!(dir = %self.dir.display(), "engine reset");
        Ok(())
    }

    /// Flushes the residual memtable and marks the engine closed.
    ///
    /// Idempotent; also invoked best-effort on drop.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        if !self.mem.is_empty() {
            self.flush_mem()?;
        }
        self.closed = true;
        info!("engine closed");
        Ok(())
    }

    /// Returns a snapshot of engine state.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            level_sizes: self.levels.iter().map(Vec::len).collect(),
            mem_entries: self.mem.num_entries(),
            vlog_head: self.vlog.end_offset(),
            vlog_tail: self.vlog.tail(),
            next_seq: self.next_seq,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Common write path for puts and tombstones: make room, settle level
    /// budgets, then insert.
    fn insert(&mut self, key: u64, value: Value) -> Result<(), EngineError> {
        if self.mem.size_bytes() >= SST_SIZE {
            self.flush_mem()?;
        }
        self.compact_overflowing()?;
        self.mem.put(key, value);
        Ok(())
    }

    /// Flushes the memtable to a new level-0 table and swaps in a fresh
    /// buffer.
    fn flush_mem(&mut self) -> Result<(), EngineError> {
        let id = self.levels[0].len();
        let seq = self.next_seq;
        self.next_seq += 1;

        let table = self
            .mem
            .flush_into_sst(0, id, seq, &self.dir, &mut self.vlog)?;
        self.levels[0].push(table);
        self.mem = MemTable::new();
        Ok(())
    }

    /// Compacts every level over its budget, shallowest first; cascades
    /// into deeper levels grown by the compaction itself.
    fn compact_overflowing(&mut self) -> Result<(), EngineError> {
        let mut level = 0;
        while level < self.levels.len() {
            if compaction::over_capacity(&self.levels, level) {
                compaction::compact_level(&mut self.levels, level, &self.dir, &self.vlog_path)?;
            }
            level += 1;
        }
        Ok(())
    }

    /// Is the frame at `offset` the current version of `key`?
    ///
    /// A memtable entry (live or tombstone) always outranks the log;
    /// otherwise the newest table containing the key must point exactly
    /// here.
    fn frame_is_live(&self, key: u64, offset: u64) -> bool {
        if self.mem.get(key).is_some() {
            return false;
        }
        match self.newest_slot(key) {
            KeySlot::LiveAt(slot_offset) => slot_offset == offset,
            KeySlot::Tombstone | KeySlot::NotPresent => false,
        }
    }

    /// The newest table's verdict on where `key` lives.
    ///
    /// Searches levels ascending and ids descending; bloom misses and
    /// false positives (which surface as `NotPresent`) skip to the next
    /// table.
    fn newest_slot(&self, key: u64) -> KeySlot {
        for level in &self.levels {
            for table in level.iter().rev() {
                if !table.query(key) {
                    continue;
                }
                match table.slot_of(key) {
                    KeySlot::NotPresent => continue,
                    slot => return slot,
                }
            }
        }
        KeySlot::NotPresent
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "flush on drop failed; unflushed writes lost");
        }
    }
}
