//! Tail-recovery tests for the value log.
//!
//! Recovery must position `tail` at the first checksum-valid frame,
//! skipping hole-punched garbage and torn trailing writes. Corruption is
//! simulated by writing directly to the log file between opens.
//!
//! Hole granularity: punches are block-aligned, so these tests size frames
//! to exactly one 4096-byte filesystem block where alignment matters.

#[cfg(test)]
mod tests {
    use crate::vlog::{VLog, VLOG_PREFIX};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    const BLOCK: u64 = 4096;

    /// Appends a frame padded so the whole frame occupies exactly one block.
    /// The payload avoids 0xFF so punched garbage can't alias a marker.
    fn append_block_frame(vlog: &mut VLog, key: u64) -> u64 {
        let value = vec![0x41u8; (BLOCK - VLOG_PREFIX) as usize];
        vlog.append(key, &value).unwrap()
    }

    #[test]
    fn reopen_preserves_frames() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        {
            let mut vlog = VLog::open(&path).unwrap();
            vlog.append(1, b"alpha").unwrap();
            vlog.append(2, b"beta").unwrap();
            vlog.sync().unwrap();
        }

        let vlog = VLog::open(&path).unwrap();
        assert_eq!(vlog.tail(), 0);
        assert_eq!(vlog.read_value(0, 5).unwrap(), b"alpha");
    }

    #[test]
    fn truncated_trailing_frame_is_excluded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        let full_len = {
            let mut vlog = VLog::open(&path).unwrap();
            vlog.append(1, b"alpha").unwrap();
            vlog.append(2, b"beta").unwrap();
            vlog.sync().unwrap();
            vlog.end_offset()
        };

        // Tear the last 5 bytes off, as an interrupted write would.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full_len - 5).unwrap();
        f.sync_all().unwrap();

        let vlog = VLog::open(&path).unwrap();
        // The first frame is intact; recovery keeps tail at 0.
        assert_eq!(vlog.tail(), 0);
        assert_eq!(vlog.end_offset(), full_len - 5);
        assert_eq!(vlog.read_value(0, 5).unwrap(), b"alpha");
    }

    #[test]
    fn corrupt_first_frame_skips_to_next() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        let second = {
            let mut vlog = VLog::open(&path).unwrap();
            vlog.append(1, b"alpha").unwrap();
            let second = vlog.append(2, b"beta").unwrap();
            vlog.sync().unwrap();
            second
        };

        // Flip one payload byte of the first frame.
        let mut f = OpenOptions::new().write(true).read(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(VLOG_PREFIX)).unwrap();
        f.write_all(&[b'X']).unwrap();
        f.sync_all().unwrap();

        let vlog = VLog::open(&path).unwrap();
        assert_eq!(vlog.tail(), second);
        assert_eq!(vlog.read_value(second, 4).unwrap(), b"beta");
    }

    #[test]
    fn punched_prefix_moves_tail_to_first_live_block() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        {
            let mut vlog = VLog::open(&path).unwrap();
            append_block_frame(&mut vlog, 1);
            append_block_frame(&mut vlog, 2);
            append_block_frame(&mut vlog, 3);
            vlog.sync().unwrap();

            // Reclaim the first frame exactly.
            vlog.punch_hole(0, BLOCK).unwrap();
            assert_eq!(vlog.tail(), BLOCK);
        }

        let vlog = VLog::open(&path).unwrap();
        assert_eq!(vlog.tail(), BLOCK);

        let record = vlog.record_at(vlog.tail()).unwrap().unwrap();
        assert_eq!(record.key, 2);
    }

    #[test]
    fn fully_punched_log_recovers_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        {
            let mut vlog = VLog::open(&path).unwrap();
            append_block_frame(&mut vlog, 1);
            append_block_frame(&mut vlog, 2);
            vlog.sync().unwrap();

            let head = vlog.end_offset();
            vlog.punch_hole(0, head).unwrap();
            assert_eq!(vlog.tail(), head);
        }

        let vlog = VLog::open(&path).unwrap();
        assert_eq!(vlog.tail(), vlog.end_offset());
        assert!(vlog.record_at(vlog.tail()).unwrap().is_none());
    }

    #[test]
    fn garbage_between_hole_and_live_frame_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vlog");

        let third = {
            let mut vlog = VLog::open(&path).unwrap();
            append_block_frame(&mut vlog, 1);
            append_block_frame(&mut vlog, 2);
            let third = append_block_frame(&mut vlog, 3);
            vlog.sync().unwrap();
            third
        };

        // Punch only the first block, then damage the second frame's
        // payload: recovery must hop over it to frame 3.
        {
            let mut vlog = VLog::open(&path).unwrap();
            vlog.punch_hole(0, BLOCK).unwrap();
        }
        let mut f = OpenOptions::new().write(true).read(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(BLOCK + VLOG_PREFIX)).unwrap();
        f.write_all(&[b'Z']).unwrap();
        f.sync_all().unwrap();

        let vlog = VLog::open(&path).unwrap();
        assert_eq!(vlog.tail(), third);
        let record = vlog.record_at(vlog.tail()).unwrap().unwrap();
        assert_eq!(record.key, 3);
    }
}
