//! Build / load / point-lookup tests for SSTs.

#[cfg(test)]
mod tests {
    use crate::sstable::tests::helpers::build_table;
    use crate::sstable::{
        KeySlot, Lookup, SST_MAX_ENTRIES, SST_SIZE, SsTable, parse_sst_file_name, sst_file_name,
    };
    use tempfile::TempDir;

    #[test]
    fn file_name_round_trips() {
        assert_eq!(sst_file_name(0, 7), "0-7.sst");
        assert_eq!(parse_sst_file_name("0-7.sst"), Some((0, 7)));
        assert_eq!(parse_sst_file_name("12-345.sst"), Some((12, 345)));
        assert_eq!(parse_sst_file_name("vlog"), None);
        assert_eq!(parse_sst_file_name("a-b.sst"), None);
    }

    #[test]
    fn write_then_open_round_trips() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> = vec![
            (3, Some(b"three")),
            (7, None),
            (9, Some(b"nine")),
        ];
        let built = build_table(tmp.path(), &vlog_path, 0, 5, &pairs);
        drop(built);

        let table = SsTable::open(0, 0, tmp.path(), &vlog_path).unwrap();
        assert_eq!(table.seq(), 5);
        assert_eq!(table.num_kv(), 3);
        assert_eq!(table.min_key(), 3);
        assert_eq!(table.max_key(), 9);
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.entries()[1].vlen, 0, "tombstone entry keeps vlen 0");
    }

    #[test]
    fn get_hit_tombstone_and_miss() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> =
            vec![(1, Some(b"one")), (2, None), (4, Some(b"four"))];
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);

        assert_eq!(table.get(1).unwrap(), Lookup::Hit(b"one".to_vec()));
        assert_eq!(table.get(2).unwrap(), Lookup::Tombstone);
        assert_eq!(table.get(3).unwrap(), Lookup::Miss);
        assert_eq!(table.get(4).unwrap(), Lookup::Hit(b"four".to_vec()));
    }

    #[test]
    fn bloom_has_no_false_negatives() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let keys: Vec<u64> = (0..100).map(|i| i * 3).collect();
        let pairs: Vec<(u64, Option<&[u8]>)> =
            keys.iter().map(|&k| (k, Some(b"v" as &[u8]))).collect();
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);

        for &key in &keys {
            assert!(table.query(key), "indexed key {key} must pass the bloom");
        }
    }

    #[test]
    fn slot_of_distinguishes_all_cases() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> = vec![(10, Some(b"ten")), (20, None)];
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);

        let offset = table.entries()[0].offset;
        assert_eq!(table.slot_of(10), KeySlot::LiveAt(offset));
        assert_eq!(table.slot_of(20), KeySlot::Tombstone);
        assert_eq!(table.slot_of(30), KeySlot::NotPresent);
    }

    #[test]
    fn rename_id_moves_the_file() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> = vec![(1, Some(b"x"))];
        let mut table = build_table(tmp.path(), &vlog_path, 3, 1, &pairs);

        let old_path = table.file_path();
        table.rename_id(0).unwrap();

        assert!(!old_path.exists());
        assert!(table.file_path().exists());
        assert_eq!(table.id(), 0);
        assert_eq!(table.get(1).unwrap(), Lookup::Hit(b"x".to_vec()));
    }

    #[test]
    fn delete_disk_removes_the_file() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> = vec![(1, Some(b"x"))];
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);

        let path = table.file_path();
        assert!(path.exists());
        table.delete_disk().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn full_table_stays_within_size_budget() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let keys: Vec<u64> = (0..SST_MAX_ENTRIES as u64).collect();
        let pairs: Vec<(u64, Option<&[u8]>)> =
            keys.iter().map(|&k| (k, Some(b"payload" as &[u8]))).collect();
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);

        let file_len = std::fs::metadata(table.file_path()).unwrap().len();
        assert!(file_len as usize <= SST_SIZE);
        assert_eq!(table.num_kv() as usize, SST_MAX_ENTRIES);
    }

    #[test]
    fn open_rejects_truncated_file() {
        let tmp = TempDir::new().unwrap();
        let vlog_path = tmp.path().join("vlog");

        let pairs: Vec<(u64, Option<&[u8]>)> = vec![(1, Some(b"x")), (2, Some(b"y"))];
        let table = build_table(tmp.path(), &vlog_path, 0, 1, &pairs);
        let path = table.file_path();
        drop(table);

        // Chop off the last index entry: declared num_kv no longer fits.
        let full = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full - 10).unwrap();

        assert!(SsTable::open(0, 0, tmp.path(), &vlog_path).is_err());
    }
}
