// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Order-preserving encoding of primitive values.
//!
//! The encoded bytes compare (as unsigned byte strings) the same way the
//! original values compare, which is what allows the store to keep regions as
//! contiguous key ranges. The layout follows the store's codec exactly:
//!
//! - signed ints: sign bit flipped, then big-endian
//! - unsigned ints: plain big-endian
//! - floats: sign bit flipped for non-negative values, all bits flipped for
//!   negative values, then big-endian
//! - bytes: split into groups of 8, each group zero-padded and followed by a
//!   marker byte `0xFF - pad_count`

use bytes_ext::{SafeBuf, SafeBufMut};
use snafu::{ensure, Backtrace, ResultExt, Snafu};

use crate::define_result;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to encode value, err:{}", source))]
    EncodeValue { source: bytes_ext::Error },

    #[snafu(display("Failed to decode value, err:{}", source))]
    DecodeValue { source: bytes_ext::Error },

    #[snafu(display(
        "Invalid marker byte in group encoded bytes, marker:{}.\nBacktrace:\n{}",
        marker,
        backtrace
    ))]
    InvalidMarker { marker: u8, backtrace: Backtrace },

    #[snafu(display(
        "Invalid padding in group encoded bytes, pad:{}.\nBacktrace:\n{}",
        pad,
        backtrace
    ))]
    InvalidPadding { pad: usize, backtrace: Backtrace },
}

define_result!(Error);

const SIGN_MASK: u64 = 0x8000_0000_0000_0000;
const BYTES_GROUP_SIZE: usize = 8;
const BYTES_FULL_GROUP_MARKER: u8 = 0xff;

/// Encode a signed int in the order-preserving format.
pub fn encode_i64<B: SafeBufMut>(buf: &mut B, v: i64) -> Result<()> {
    buf.try_put_u64((v as u64) ^ SIGN_MASK).context(EncodeValue)
}

pub fn decode_i64<B: SafeBuf>(buf: &mut B) -> Result<i64> {
    let v = SafeBuf::try_get_u64(buf).context(DecodeValue)?;
    Ok((v ^ SIGN_MASK) as i64)
}

/// Encode an unsigned int in the order-preserving format.
pub fn encode_u64<B: SafeBufMut>(buf: &mut B, v: u64) -> Result<()> {
    buf.try_put_u64(v).context(EncodeValue)
}

pub fn decode_u64<B: SafeBuf>(buf: &mut B) -> Result<u64> {
    SafeBuf::try_get_u64(buf).context(DecodeValue)
}

/// Encode a float in the order-preserving format.
pub fn encode_f64<B: SafeBufMut>(buf: &mut B, v: f64) -> Result<()> {
    let bits = v.to_bits();
    let ordered = if bits & SIGN_MASK == 0 {
        bits | SIGN_MASK
    } else {
        !bits
    };
    buf.try_put_u64(ordered).context(EncodeValue)
}

pub fn decode_f64<B: SafeBuf>(buf: &mut B) -> Result<f64> {
    let ordered = SafeBuf::try_get_u64(buf).context(DecodeValue)?;
    let bits = if ordered & SIGN_MASK != 0 {
        ordered & !SIGN_MASK
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}

/// Encode a byte string in the order-preserving group format.
///
/// Every group holds 8 payload bytes; the last group is zero-padded and the
/// marker byte records how much of it is real data, so `"ab"` sorts before
/// `"ab\x00"` and prefixes stay prefixes.
pub fn encode_bytes<B: SafeBufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    let mut index = 0;
    loop {
        let remaining = data.len() - index;
        if remaining >= BYTES_GROUP_SIZE {
            buf.try_put(&data[index..index + BYTES_GROUP_SIZE])
                .context(EncodeValue)?;
            buf.try_put_u8(BYTES_FULL_GROUP_MARKER).context(EncodeValue)?;
            index += BYTES_GROUP_SIZE;
        } else {
            let pad = BYTES_GROUP_SIZE - remaining;
            buf.try_put(&data[index..]).context(EncodeValue)?;
            buf.try_put(&[0u8; BYTES_GROUP_SIZE][..pad])
                .context(EncodeValue)?;
            buf.try_put_u8(BYTES_FULL_GROUP_MARKER - pad as u8)
                .context(EncodeValue)?;
            return Ok(());
        }
    }
}

pub fn decode_bytes<B: SafeBuf>(buf: &mut B) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let mut group = [0u8; BYTES_GROUP_SIZE];
        SafeBuf::try_copy_to_slice(buf, &mut group).context(DecodeValue)?;
        let marker = SafeBuf::try_get_u8(buf).context(DecodeValue)?;

        ensure!(
            marker > BYTES_FULL_GROUP_MARKER - BYTES_GROUP_SIZE as u8 - 1,
            InvalidMarker { marker }
        );

        let pad = (BYTES_FULL_GROUP_MARKER - marker) as usize;
        if pad == 0 {
            data.extend_from_slice(&group);
            continue;
        }

        ensure!(pad <= BYTES_GROUP_SIZE, InvalidPadding { pad });
        let real = BYTES_GROUP_SIZE - pad;
        ensure!(
            group[real..].iter().all(|b| *b == 0),
            InvalidPadding { pad }
        );
        data.extend_from_slice(&group[..real]);
        return Ok(data);
    }
}

/// Exact encoded size of `data` in the group format.
pub fn encoded_bytes_len(data: &[u8]) -> usize {
    (data.len() / BYTES_GROUP_SIZE + 1) * (BYTES_GROUP_SIZE + 1)
}

#[cfg(test)]
mod tests {
    use bytes_ext::BytesMut;

    use super::*;

    fn encoded_i64(v: i64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_i64(&mut buf, v).unwrap();
        buf.to_vec()
    }

    fn encoded_f64(v: f64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_f64(&mut buf, v).unwrap();
        buf.to_vec()
    }

    fn encoded_bytes(v: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_bytes(&mut buf, v).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_i64_order_preserved() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        for pair in values.windows(2) {
            assert!(encoded_i64(pair[0]) < encoded_i64(pair[1]));
        }
        for v in values {
            assert_eq!(v, decode_i64(&mut &encoded_i64(v)[..]).unwrap());
        }
    }

    #[test]
    fn test_f64_order_preserved() {
        let values = [-1000.5f64, -1.0, -0.0, 0.0, 0.5, 2.0, 1e10];
        for pair in values.windows(2) {
            assert!(encoded_f64(pair[0]) <= encoded_f64(pair[1]));
        }
        for v in values {
            assert_eq!(v, decode_f64(&mut &encoded_f64(v)[..]).unwrap());
        }
    }

    #[test]
    fn test_bytes_order_preserved() {
        let values: [&[u8]; 6] = [b"", b"a", b"ab", b"ab\x00", b"abcdefgh", b"abcdefgh\x01"];
        for pair in values.windows(2) {
            assert!(encoded_bytes(pair[0]) < encoded_bytes(pair[1]));
        }
        for v in values {
            assert_eq!(v.to_vec(), decode_bytes(&mut &encoded_bytes(v)[..]).unwrap());
            assert_eq!(encoded_bytes(v).len(), encoded_bytes_len(v));
        }
    }

    #[test]
    fn test_bytes_known_layout() {
        // One full group plus an empty terminator group.
        assert_eq!(
            vec![b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0xf7],
            encoded_bytes(b"abcdefgh")
        );
        // Two real bytes, six bytes of padding.
        assert_eq!(
            vec![b'a', b'b', 0, 0, 0, 0, 0, 0, 0xf9],
            encoded_bytes(b"ab")
        );
    }
}
