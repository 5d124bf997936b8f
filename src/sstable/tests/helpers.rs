use std::path::Path;

use crate::bloom::BloomFilter;
use crate::sstable::{IndexEntry, SsTable, SstHeader};
use crate::vlog::VLog;

/// Builds and writes an SST at level 0 from `(key, value-or-tombstone)`
/// pairs (must be ascending by key), appending live values to the vlog at
/// `vlog_path`.
pub fn build_table(
    dir: &Path,
    vlog_path: &Path,
    id: usize,
    seq: u64,
    pairs: &[(u64, Option<&[u8]>)],
) -> SsTable {
    let mut vlog = VLog::open(vlog_path).expect("open vlog");

    let mut bloom = BloomFilter::new();
    let mut entries = Vec::new();
    let mut min_key = u64::MAX;
    let mut max_key = 0u64;

    for &(key, value) in pairs {
        bloom.insert(key);
        let offset = vlog.end_offset();
        match value {
            Some(v) => {
                let offset = vlog.append(key, v).expect("append");
                min_key = min_key.min(key);
                max_key = max_key.max(key);
                entries.push(IndexEntry {
                    key,
                    offset,
                    vlen: v.len() as u32,
                });
            }
            None => entries.push(IndexEntry {
                key,
                offset,
                vlen: 0,
            }),
        }
    }
    vlog.sync().expect("sync vlog");

    let header = SstHeader {
        seq,
        num_kv: entries.len() as u64,
        min_key,
        max_key,
    };
    let table = SsTable::new(header, 0, id, bloom, entries, dir, vlog_path);
    table.write_disk().expect("write sst");
    table
}
