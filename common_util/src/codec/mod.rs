// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Data encoding.

pub mod memcomparable;
pub mod var;

use bytes_ext::{Buf, BufMut};

/// Encoder encodes value into the buffer.
pub trait Encoder<T: ?Sized> {
    type Error;

    /// Encode value into the buffer.
    fn encode<B: BufMut>(&self, buf: &mut B, value: &T) -> Result<(), Self::Error>;

    /// Estimate the size of the encoded value, may be not exact but should be
    /// no less than the actual encoded size.
    fn estimate_encoded_size(&self, value: &T) -> usize;
}

/// Decoder decodes value from the buffer.
pub trait Decoder<T> {
    type Error;

    /// Decode value from the buffer.
    fn decode<B: Buf>(&self, buf: &mut B) -> Result<T, Self::Error>;
}
