// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Extensions over [bytes].
//!
//! The `bytes` crate panics on out-of-range reads and writes. The codec layer
//! works on untrusted buffers, so it goes through the `try_*` variants defined
//! here which surface a proper error instead.

use snafu::{ensure, Backtrace, Snafu};

pub use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Failed to read bytes, expect:{}, remaining:{}.\nBacktrace:\n{}",
        expect,
        remaining,
        backtrace
    ))]
    UnexpectedEof {
        expect: usize,
        remaining: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Failed to write bytes, expect:{}, remaining:{}.\nBacktrace:\n{}",
        expect,
        remaining,
        backtrace
    ))]
    WouldOverflow {
        expect: usize,
        remaining: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-panicking read operations over a [Buf].
pub trait SafeBuf: Buf {
    fn try_get_u8(&mut self) -> Result<u8> {
        ensure!(
            self.remaining() >= 1,
            UnexpectedEof {
                expect: 1usize,
                remaining: self.remaining(),
            }
        );
        Ok(self.get_u8())
    }

    fn try_get_u64(&mut self) -> Result<u64> {
        ensure!(
            self.remaining() >= 8,
            UnexpectedEof {
                expect: 8usize,
                remaining: self.remaining(),
            }
        );
        Ok(self.get_u64())
    }

    fn try_copy_to_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        ensure!(
            self.remaining() >= dst.len(),
            UnexpectedEof {
                expect: dst.len(),
                remaining: self.remaining(),
            }
        );
        self.copy_to_slice(dst);
        Ok(())
    }
}

impl<T: Buf> SafeBuf for T {}

/// Non-panicking write operations over a [BufMut].
pub trait SafeBufMut: BufMut {
    fn try_put_u8(&mut self, v: u8) -> Result<()> {
        ensure!(
            self.remaining_mut() >= 1,
            WouldOverflow {
                expect: 1usize,
                remaining: self.remaining_mut(),
            }
        );
        self.put_u8(v);
        Ok(())
    }

    fn try_put_u64(&mut self, v: u64) -> Result<()> {
        ensure!(
            self.remaining_mut() >= 8,
            WouldOverflow {
                expect: 8usize,
                remaining: self.remaining_mut(),
            }
        );
        self.put_u64(v);
        Ok(())
    }

    fn try_put(&mut self, src: &[u8]) -> Result<()> {
        ensure!(
            self.remaining_mut() >= src.len(),
            WouldOverflow {
                expect: src.len(),
                remaining: self.remaining_mut(),
            }
        );
        self.put_slice(src);
        Ok(())
    }
}

impl<T: BufMut> SafeBufMut for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_buf_round_trip() {
        let mut buf = BytesMut::new();
        buf.try_put_u8(0x7f).unwrap();
        buf.try_put_u64(0x0102_0304_0506_0708).unwrap();
        buf.try_put(b"abc").unwrap();

        let mut reader = &buf[..];
        assert_eq!(0x7f, SafeBuf::try_get_u8(&mut reader).unwrap());
        assert_eq!(
            0x0102_0304_0506_0708,
            SafeBuf::try_get_u64(&mut reader).unwrap()
        );
        let mut tail = [0u8; 3];
        SafeBuf::try_copy_to_slice(&mut reader, &mut tail).unwrap();
        assert_eq!(b"abc", &tail);
    }

    #[test]
    fn test_safe_buf_eof() {
        let mut reader: &[u8] = &[1u8, 2];
        assert!(SafeBuf::try_get_u64(&mut reader).is_err());

        let mut reader: &[u8] = &[];
        assert!(SafeBuf::try_get_u8(&mut reader).is_err());
    }
}
