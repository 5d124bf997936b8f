//! Leveled Compaction Module
//!
//! Merges overflowing levels downward while preserving timestamp-based
//! version ordering. Because values live out-of-line in the value log,
//! compaction only ever rewrites 16 KiB index files — value bytes are
//! untouched.
//!
//! ## Trigger
//!
//! Level `L` tolerates at most `2^(L+2)` SSTs ([`level_capacity`]); one
//! more triggers a compaction of `L` into `L+1`.
//!
//! ## Selection
//!
//! - `L == 0`: every table (level-0 tables overlap freely).
//! - `L > 0`: the older half by id, then extended forward while the next
//!   table's `seq` does not exceed that of the half's last table —
//!   versions of a key must never be split across the selection boundary.
//!
//! Tables in `L+1` whose `[min_key, max_key]` intersects the selection's
//! key range join the merge.
//!
//! ## Merge
//!
//! A k-way heap merge ordered by `(key ascending, seq descending)`. The
//! first entry popped for a key is its newest version; later duplicates
//! are discarded under the invariant that their `seq` never exceeds the
//! survivor's.
//!
//! Tombstones are preserved at every level, including the bottom — a
//! dropped tombstone could resurrect an older version that still exists
//! in a deeper table.
//!
//! ## Write-out
//!
//! Consumed files are deleted, both levels are re-numbered so ids stay
//! contiguous from 0 (file renames), and the merged list is cut into
//! chunks of at most [`SST_MAX_ENTRIES`] entries. Each chunk becomes a
//! fresh table in `L+1` carrying the maximum `seq` of its members.


use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::bloom::BloomFilter;
use crate::sstable::{IndexEntry, SST_MAX_ENTRIES, SsTable, SsTableError, SstHeader};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// SST build, rename, or delete failure.
    #[error("SST error: {0}")]
    SsTable(#[from] SsTableError),
}

// ------------------------------------------------------------------------------------------------
// Level capacity
// ------------------------------------------------------------------------------------------------

/// Maximum number of SSTs level `L` may hold before compaction: `2^(L+2)`.
pub const fn level_capacity(level: usize) -> usize {
    1 << (level + 2)
}

/// Returns `true` when `level` holds more tables than its capacity.
pub fn over_capacity(levels: &[Vec<SsTable>], level: usize) -> bool {
    levels[level].len() > level_capacity(level)
}

// ------------------------------------------------------------------------------------------------
// Heap merge machinery
// ------------------------------------------------------------------------------------------------

/// A merged index entry tagged with its source table's timestamp.
#[derive(Debug, Clone, Copy)]
struct MergedEntry {
    key: u64,
    offset: u64,
    vlen: u32,
    seq: u64,
}

/// Heap item: one pending entry plus the source stream it came from.
struct HeapItem {
    entry: MergedEntry,
    source: usize,
}

impl Ord for HeapItem {
    /// Max-heap priority: smallest key first, then highest seq.
    fn cmp(&self, other: &Self) -> Ordering {
        match other.entry.key.cmp(&self.entry.key) {
            Ordering::Equal => self.entry.seq.cmp(&other.entry.seq),
            ord => ord,
        }
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.entry.seq == other.entry.seq
    }
}

impl Eq for HeapItem {}

/// K-way merges `(seq, entries)` streams into a sorted, deduplicated list.
///
/// Each stream must be ascending by key. For a key appearing in several
/// streams the highest-seq version survives; the discarded duplicates are
/// checked against the frontier invariant (`survivor.seq ≥ duplicate.seq`).
fn merge_sources(sources: &[(u64, &[IndexEntry])]) -> Vec<MergedEntry> {
    let mut heap = BinaryHeap::new();
    let mut cursors = vec![0usize; sources.len()];

    for (idx, (seq, entries)) in sources.iter().enumerate() {
        if let Some(first) = entries.first() {
            heap.push(HeapItem {
                entry: MergedEntry {
                    key: first.key,
                    offset: first.offset,
                    vlen: first.vlen,
                    seq: *seq,
                },
                source: idx,
            });
            cursors[idx] = 1;
        }
    }

    let mut merged: Vec<MergedEntry> = Vec::new();
    while let Some(item) = heap.pop() {
        let duplicate = match merged.last() {
            Some(last) if last.key == item.entry.key => {
                // The selection rules guarantee the newest version pops
                // first for every key.
                debug_assert!(last.seq >= item.entry.seq);
                true
            }
            _ => false,
        };
        if !duplicate {
            merged.push(item.entry);
        }

        let (seq, entries) = sources[item.source];
        if let Some(next) = entries.get(cursors[item.source]) {
            cursors[item.source] += 1;
            heap.push(HeapItem {
                entry: MergedEntry {
                    key: next.key,
                    offset: next.offset,
                    vlen: next.vlen,
                    seq,
                },
                source: item.source,
            });
        }
    }

    merged
}

// ------------------------------------------------------------------------------------------------
// Selection helpers
// ------------------------------------------------------------------------------------------------

/// Number of tables to take from the front of `level`.
///
/// Level 0 is taken whole. Deeper levels give up their older half, then
/// the cut is pushed forward while the next table's seq stays at or below
/// the seq of the half's last table, so a version run straddling the
/// boundary is never split.
fn selection_size(tables: &[SsTable], level: usize) -> usize {
    if level == 0 {
        return tables.len();
    }

    let mut size = tables.len() / 2;
    let frontier_seq = tables[size - 1].seq();
    while size < tables.len() && tables[size].seq() <= frontier_seq {
        size += 1;
    }
    size
}

/// Key range `[min, max]` spanned by the live entries of `tables`.
fn key_range(tables: &[SsTable]) -> (u64, u64) {
    let mut min_key = u64::MAX;
    let mut max_key = 0u64;
    for table in tables {
        min_key = min_key.min(table.min_key());
        max_key = max_key.max(table.max_key());
    }
    (min_key, max_key)
}

// ------------------------------------------------------------------------------------------------
// Compaction driver
// ------------------------------------------------------------------------------------------------

/// Compacts `level` into `level + 1`.
///
/// See the module docs for the full pipeline. On return, ids in both
/// affected levels are contiguous from 0 and every consumed file has been
/// deleted from disk.
pub fn compact_level(
    levels: &mut Vec<Vec<SsTable>>,
    level: usize,
    dir: &Path,
    vlog_path: &Path,
) -> Result<(), CompactionError> {
    let selected = selection_size(&levels[level], level);
    let (min_key, max_key) = key_range(&levels[level][..selected]);

    if level + 1 == levels.len() {
        levels.push(Vec::new());
    }

    // Tables in L+1 whose live range intersects the selection's.
    let overlap: Vec<usize> = levels[level + 1]
        .iter()
        .enumerate()
        .filter(|(_, t)| t.min_key() <= max_key && t.max_key() >= min_key)
        .map(|(i, _)| i)
        .collect();

    debug!(
        level,
        selected,
        overlap = overlap.len(),
        min_key,
        max_key,
        "compaction selection"
    );

    // Merge while the source tables are still alive.
    let merged = {
        let mut sources: Vec<(u64, &[IndexEntry])> = Vec::new();
        for &idx in &overlap {
            let table = &levels[level + 1][idx];
            sources.push((table.seq(), table.entries()));
        }
        for table in &levels[level][..selected] {
            sources.push((table.seq(), table.entries()));
        }
        merge_sources(&sources)
    };

    // Drop consumed tables, files included.
    for &idx in overlap.iter().rev() {
        let table = levels[level + 1].remove(idx);
        table.delete_disk()?;
    }
    for table in levels[level].drain(..selected) {
        table.delete_disk()?;
    }

    // Contiguous ids in both levels.
    for lvl in [level, level + 1] {
        for (pos, table) in levels[lvl].iter_mut().enumerate() {
            table.rename_id(pos)?;
        }
    }

    // Cut the merged list into fresh tables for L+1.
    let chunk_count = merged.len().div_ceil(SST_MAX_ENTRIES);
    for chunk in merged.chunks(SST_MAX_ENTRIES) {
        let mut bloom = BloomFilter::new();
        let mut chunk_min = u64::MAX;
        let mut chunk_max = 0u64;
        let mut seq = 0u64;
        let mut entries = Vec::with_capacity(chunk.len());

        for e in chunk {
            bloom.insert(e.key);
            chunk_min = chunk_min.min(e.key);
            chunk_max = chunk_max.max(e.key);
            seq = seq.max(e.seq);
            entries.push(IndexEntry {
                key: e.key,
                offset: e.offset,
                vlen: e.vlen,
            });
        }

        let header = SstHeader {
            seq,
            num_kv: entries.len() as u64,
            min_key: chunk_min,
            max_key: chunk_max,
        };
        let id = levels[level + 1].len();
        let table = SsTable::new(header, level + 1, id, bloom, entries, dir, vlog_path);
        table.write_disk()?;
        levels[level + 1].push(table);
    }

    info!(
        level,
        consumed = selected + overlap.len(),
        produced = chunk_count,
        remaining = levels[level].len(),
        "compaction finished"
    );
    Ok(())
}
