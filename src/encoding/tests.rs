//! Wire-format tests for the encoding primitives.

use super::*;

#[test]
fn u8_round_trip() {
    for v in [0u8, 1, 0x7F, 0xFF] {
        let bytes = encode_to_vec(&v);
        assert_eq!(bytes.len(), 1);
        let (decoded, consumed) = u8::decode_from(&bytes).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(consumed, 1);
    }
}

#[test]
fn u16_is_little_endian() {
    let bytes = encode_to_vec(&0x1234u16);
    assert_eq!(bytes, vec![0x34, 0x12]);
}

#[test]
fn u32_is_little_endian() {
    let bytes = encode_to_vec(&0xDEADBEEFu32);
    assert_eq!(bytes, vec![0xEF, 0xBE, 0xAD, 0xDE]);
}

#[test]
fn u64_round_trip_extremes() {
    for v in [0u64, 1, u64::MAX, u64::MAX - 1, 0x0123_4567_89AB_CDEF] {
        let bytes = encode_to_vec(&v);
        assert_eq!(bytes.len(), 8);
        let (decoded, consumed) = u64::decode_from(&bytes).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(consumed, 8);
    }
}

#[test]
fn fixed_array_is_raw_bytes() {
    let arr = [0xAAu8, 0xBB, 0xCC];
    let bytes = encode_to_vec(&arr);
    assert_eq!(bytes, vec![0xAA, 0xBB, 0xCC]);
    let (decoded, consumed) = <[u8; 3]>::decode_from(&bytes).unwrap();
    assert_eq!(decoded, arr);
    assert_eq!(consumed, 3);
}

#[test]
fn truncated_input_reports_eof() {
    let err = u64::decode_from(&[0u8; 3]).unwrap_err();
    match err {
        EncodingError::UnexpectedEof { needed, available } => {
            assert_eq!(needed, 8);
            assert_eq!(available, 3);
        }
    }
}

#[test]
fn cursor_walks_multiple_values() {
    let mut buf = Vec::new();
    0xFFu8.encode_to(&mut buf);
    0xBEEFu16.encode_to(&mut buf);
    42u64.encode_to(&mut buf);

    let mut off = 0;
    let (magic, n) = u8::decode_from(&buf[off..]).unwrap();
    off += n;
    let (checksum, n) = u16::decode_from(&buf[off..]).unwrap();
    off += n;
    let (key, n) = u64::decode_from(&buf[off..]).unwrap();
    off += n;

    assert_eq!(magic, 0xFF);
    assert_eq!(checksum, 0xBEEF);
    assert_eq!(key, 42);
    assert_eq!(off, buf.len());
}
