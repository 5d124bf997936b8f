//! Basic append / read cycle tests for the value log.

#[cfg(test)]
mod tests {
    use crate::vlog::{VLog, VLOG_PREFIX, VlogError};
    use tempfile::TempDir;

    #[test]
    fn append_returns_sequential_offsets() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        let off_a = vlog.append(1, b"aaa").unwrap();
        let off_b = vlog.append(2, b"bb").unwrap();
        let off_c = vlog.append(3, b"c").unwrap();

        assert_eq!(off_a, 0);
        assert_eq!(off_b, VLOG_PREFIX + 3);
        assert_eq!(off_c, off_b + VLOG_PREFIX + 2);
        assert_eq!(vlog.end_offset(), off_c + VLOG_PREFIX + 1);
    }

    #[test]
    fn read_value_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        let off = vlog.append(42, b"the quick brown fox").unwrap();
        let value = vlog.read_value(off, 19).unwrap();
        assert_eq!(value, b"the quick brown fox");
    }

    #[test]
    fn read_value_with_wrong_length_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        let off = vlog.append(42, b"hello").unwrap();
        // Wrong vlen makes the stored prefix disagree with the caller.
        let err = vlog.read_value(off, 4).unwrap_err();
        assert!(matches!(err, VlogError::Corrupt { offset } if offset == off));
    }

    #[test]
    fn record_at_walks_the_frame_stream() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        vlog.append(10, b"ten").unwrap();
        vlog.append(20, b"twenty").unwrap();
        vlog.append(30, b"thirty").unwrap();

        let mut pos = 0;
        let mut keys = Vec::new();
        while let Some(record) = vlog.record_at(pos).unwrap() {
            keys.push(record.key);
            pos += record.frame_len();
        }
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(pos, vlog.end_offset());
    }

    #[test]
    fn record_at_head_returns_none() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        vlog.append(1, b"x").unwrap();
        assert!(vlog.record_at(vlog.end_offset()).unwrap().is_none());
    }

    #[test]
    fn empty_value_frame() {
        let tmp = TempDir::new().unwrap();
        let mut vlog = VLog::open(tmp.path().join("vlog")).unwrap();

        let off = vlog.append(5, b"").unwrap();
        assert_eq!(vlog.end_offset(), off + VLOG_PREFIX);
        assert_eq!(vlog.read_value(off, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn open_empty_log() {
        let tmp = TempDir::new().unwrap();
        let vlog = VLog::open(tmp.path().join("vlog")).unwrap();
        assert_eq!(vlog.end_offset(), 0);
        assert_eq!(vlog.tail(), 0);
        assert!(vlog.record_at(0).unwrap().is_none());
    }
}
