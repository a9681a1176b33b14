// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Minimal protobuf wire-format encoding, sufficient for the pprof
//! `Profile` message.
//!
//! Only the two wire types pprof uses are implemented: varint (0) and
//! length-delimited (2). Signed `int64` fields are emitted as the plain
//! varint of the two's-complement value — not zigzag — matching the
//! `int64` (rather than `sint64`) field type in profile.proto.

/// Wire type 0: varint.
pub const WIRE_TYPE_VARINT: u64 = 0;
/// Wire type 2: length-delimited.
pub const WIRE_TYPE_LENGTH_DELIMITED: u64 = 2;

/// A message that can emit its own fields into a buffer.
pub trait WireMessage {
    /// Append this message's fields to `buf`, without any length prefix.
    fn encode(&self, buf: &mut Vec<u8>);
}

/// Unsigned LEB128.
pub fn encode_varint(mut n: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// `(field_number << 3) | wire_type`, as a varint.
pub fn encode_tag(field: u32, wire_type: u64, buf: &mut Vec<u8>) {
    encode_varint((u64::from(field) << 3) | wire_type, buf);
}

/// An `int64` field, emitted unconditionally, zero included.
pub fn encode_int64(field: u32, v: i64, buf: &mut Vec<u8>) {
    encode_tag(field, WIRE_TYPE_VARINT, buf);
    encode_varint(v as u64, buf);
}

/// An `int64` field, emitted only when `v != 0` (proto3 default
/// suppression).
pub fn encode_int64_opt(field: u32, v: i64, buf: &mut Vec<u8>) {
    if v != 0 {
        encode_int64(field, v, buf);
    }
}

/// A `uint64` field, emitted only when `v != 0`.
pub fn encode_uint64_opt(field: u32, v: u64, buf: &mut Vec<u8>) {
    if v != 0 {
        encode_tag(field, WIRE_TYPE_VARINT, buf);
        encode_varint(v, buf);
    }
}

/// A `bool` field, emitted only when `v` is true.
pub fn encode_bool_opt(field: u32, v: bool, buf: &mut Vec<u8>) {
    if v {
        encode_tag(field, WIRE_TYPE_VARINT, buf);
        buf.push(1);
    }
}

fn encode_bytes(field: u32, data: &[u8], buf: &mut Vec<u8>) {
    encode_tag(field, WIRE_TYPE_LENGTH_DELIMITED, buf);
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

/// A `string` field, emitted only for a non-empty string.
pub fn encode_string(field: u32, s: &str, buf: &mut Vec<u8>) {
    if !s.is_empty() {
        encode_bytes(field, s.as_bytes(), buf);
    }
}

/// Repeated string emitter for the string table. Unlike [`encode_string`],
/// empty entries are kept: index 0 of the table is `""` and must appear on
/// the wire so decoders reconstruct the same indices.
pub fn encode_strings(field: u32, strings: &[String], buf: &mut Vec<u8>) {
    for s in strings {
        encode_bytes(field, s.as_bytes(), buf);
    }
}

/// Packed repeated `int64`: one tag, the payload byte length, then the
/// concatenated varints. Skipped entirely when the slice is empty.
pub fn encode_int64s(field: u32, values: &[i64], buf: &mut Vec<u8>) {
    if values.is_empty() {
        return;
    }
    let mut inner = Vec::new();
    for &v in values {
        encode_varint(v as u64, &mut inner);
    }
    encode_bytes(field, &inner, buf);
}

/// Packed repeated `uint64`, as [`encode_int64s`].
pub fn encode_uint64s(field: u32, values: &[u64], buf: &mut Vec<u8>) {
    if values.is_empty() {
        return;
    }
    let mut inner = Vec::new();
    for &v in values {
        encode_varint(v, &mut inner);
    }
    encode_bytes(field, &inner, buf);
}

/// Length-prefix a sub-message by encoding it into a scratch buffer first
/// to learn its size.
pub fn encode_message<M: WireMessage>(field: u32, msg: &M, buf: &mut Vec<u8>) {
    let mut inner = Vec::new();
    msg.encode(&mut inner);
    encode_bytes(field, &inner, buf);
}

/// One length-prefixed sub-message per element.
pub fn encode_repeated_message<M: WireMessage>(field: u32, msgs: &[M], buf: &mut Vec<u8>) {
    for msg in msgs {
        encode_message(field, msg, buf);
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, &[0x00]; "zero")]
    #[test_case(1, &[0x01]; "one")]
    #[test_case(127, &[0x7f]; "single byte max")]
    #[test_case(128, &[0x80, 0x01]; "two bytes min")]
    #[test_case(300, &[0xac, 0x02]; "two bytes")]
    #[test_case(u64::MAX, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]; "ten bytes")]
    fn test_varint(n: u64, expected: &[u8]) {
        let mut buf = Vec::new();
        encode_varint(n, &mut buf);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_tag() {
        let mut buf = Vec::new();
        encode_tag(1, WIRE_TYPE_LENGTH_DELIMITED, &mut buf);
        assert_eq!(buf, [0x0a]);
        buf.clear();
        encode_tag(14, WIRE_TYPE_VARINT, &mut buf);
        assert_eq!(buf, [0x70]);
    }

    #[test]
    fn test_int64_negative_uses_twos_complement() {
        // int64 fields carry negatives as the full 10-byte varint of the
        // two's-complement bits
        let mut buf = Vec::new();
        encode_int64(1, -1, &mut buf);
        assert_eq!(buf[0], 0x08);
        assert_eq!(
            &buf[1..],
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
        );
    }

    #[test]
    fn test_zero_suppression() {
        let mut buf = Vec::new();
        encode_int64_opt(3, 0, &mut buf);
        encode_uint64_opt(3, 0, &mut buf);
        encode_bool_opt(3, false, &mut buf);
        encode_string(3, "", &mut buf);
        encode_int64s(3, &[], &mut buf);
        encode_uint64s(3, &[], &mut buf);
        assert!(buf.is_empty());

        encode_int64(3, 0, &mut buf);
        assert_eq!(buf, [0x18, 0x00]);
    }

    #[test]
    fn test_string() {
        let mut buf = Vec::new();
        encode_string(6, "ab", &mut buf);
        assert_eq!(buf, [0x32, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_strings_keeps_empty_entries() {
        let mut buf = Vec::new();
        encode_strings(6, &[String::new(), "x".to_owned()], &mut buf);
        assert_eq!(buf, [0x32, 0x00, 0x32, 0x01, b'x']);
    }

    #[test]
    fn test_packed_ints() {
        let mut buf = Vec::new();
        encode_uint64s(1, &[1, 128], &mut buf);
        // tag, length 3, then 0x01 and 0x80 0x01
        assert_eq!(buf, [0x0a, 0x03, 0x01, 0x80, 0x01]);

        buf.clear();
        encode_int64s(2, &[3, 3000], &mut buf);
        assert_eq!(buf, [0x12, 0x03, 0x03, 0xb8, 0x17]);
    }

    struct Pair(i64, i64);
    impl WireMessage for Pair {
        fn encode(&self, buf: &mut Vec<u8>) {
            encode_int64_opt(1, self.0, buf);
            encode_int64_opt(2, self.1, buf);
        }
    }

    #[test]
    fn test_message_length_prefix() {
        let mut buf = Vec::new();
        encode_message(11, &Pair(1, 300), &mut buf);
        assert_eq!(buf, [0x5a, 0x05, 0x08, 0x01, 0x10, 0xac, 0x02]);
    }

    #[test]
    fn test_repeated_message() {
        let mut buf = Vec::new();
        encode_repeated_message(1, &[Pair(1, 2), Pair(0, 0)], &mut buf);
        // the all-default element still gets a tag and a zero length
        assert_eq!(buf, [0x0a, 0x04, 0x08, 0x01, 0x10, 0x02, 0x0a, 0x00]);
    }

    #[test]
    fn test_bool() {
        let mut buf = Vec::new();
        encode_bool_opt(7, true, &mut buf);
        assert_eq!(buf, [0x38, 0x01]);
    }
}
