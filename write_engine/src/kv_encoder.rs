// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Encoding of rows and index entries into the store's kv format.
//!
//! The layout has to stay bit-exact with what the store and its SQL layer
//! already write, down to the prefix bytes; nothing here is versioned because
//! the format is not ours to evolve.

use common_types::{
    bytes::{self, Buf, BufMut, BytesMut, SafeBuf, SafeBufMut},
    datum::{Datum, DatumKind},
    row::Row,
    schema::{IndexSchema, TableInfo},
    table::{Handle, TableId},
};
use common_util::{
    codec::{memcomparable, var, Decoder, Encoder},
    define_result,
};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

/// Every table key starts with this byte.
pub const TABLE_PREFIX: u8 = b't';
/// Separates the table id from the record (row) suffix.
pub const RECORD_PREFIX_SEP: &[u8] = b"_r";
/// Separates the table id from the index suffix.
pub const INDEX_PREFIX_SEP: &[u8] = b"_i";

/// Value of every non-unique index entry.
pub const NON_UNIQUE_INDEX_VALUE: &[u8] = b"0";

// Flag bytes of the datum encoding.
const NIL_FLAG: u8 = 0;
const BYTES_FLAG: u8 = 1;
const COMPACT_BYTES_FLAG: u8 = 2;
const INT_FLAG: u8 = 3;
const UINT_FLAG: u8 = 4;
const FLOAT_FLAG: u8 = 5;
const VARINT_FLAG: u8 = 8;
const UVARINT_FLAG: u8 = 9;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to encode key, err:{}", source))]
    EncodeKey { source: bytes::Error },

    #[snafu(display("Failed to decode key, err:{}", source))]
    DecodeKey { source: bytes::Error },

    #[snafu(display("Failed to encode datum, err:{}", source))]
    EncodeDatum {
        source: common_util::codec::memcomparable::Error,
    },

    #[snafu(display("Failed to decode datum, err:{}", source))]
    DecodeDatum {
        source: common_util::codec::memcomparable::Error,
    },

    #[snafu(display("Failed to encode varint, err:{}", source))]
    EncodeVar { source: common_util::codec::var::Error },

    #[snafu(display("Failed to decode varint, err:{}", source))]
    DecodeVar { source: common_util::codec::var::Error },

    #[snafu(display("Invalid key prefix.\nBacktrace:\n{}", backtrace))]
    InvalidKeyPrefix { backtrace: Backtrace },

    #[snafu(display("Invalid datum flag, flag:{}.\nBacktrace:\n{}", flag, backtrace))]
    InvalidFlag { flag: u8, backtrace: Backtrace },

    #[snafu(display(
        "Row value refers to an unknown column, column_id:{}.\nBacktrace:\n{}",
        column_id,
        backtrace
    ))]
    UnknownColumnId { column_id: i64, backtrace: Backtrace },

    #[snafu(display(
        "Unique index value must be 8 bytes, len:{}.\nBacktrace:\n{}",
        len,
        backtrace
    ))]
    InvalidIndexValue { len: usize, backtrace: Backtrace },

    #[snafu(display(
        "Datum kind mismatches the declared column, column_id:{}, err:{}",
        column_id,
        source
    ))]
    ConvertDatum {
        column_id: i64,
        source: common_types::datum::Error,
    },
}

define_result!(Error);

/// Row key of one handle in one table.
pub type RowKey = (TableId, Handle);

#[derive(Debug, Clone, Default)]
pub struct RowKeyEncoder;

impl Encoder<RowKey> for RowKeyEncoder {
    type Error = Error;

    /// Key format:
    ///
    /// ```text
    /// +--------+------------------+------------+----------------+
    /// | 't'    | table_id(enc i64)| "_r"       | handle(enc i64)|
    /// +--------+------------------+------------+----------------+
    /// ```
    ///
    /// Ints are sign-flipped big-endian, so row keys of one table sort by
    /// handle.
    fn encode<B: BufMut>(&self, buf: &mut B, row_key: &RowKey) -> Result<()> {
        buf.try_put_u8(TABLE_PREFIX).context(EncodeKey)?;
        memcomparable::encode_i64(buf, row_key.0).context(EncodeDatum)?;
        buf.try_put(RECORD_PREFIX_SEP).context(EncodeKey)?;
        memcomparable::encode_i64(buf, row_key.1).context(EncodeDatum)?;

        Ok(())
    }

    fn estimate_encoded_size(&self, _row_key: &RowKey) -> usize {
        // Refer to key format.
        1 + 8 + 2 + 8
    }
}

impl Decoder<RowKey> for RowKeyEncoder {
    type Error = Error;

    fn decode<B: Buf>(&self, buf: &mut B) -> Result<RowKey> {
        let prefix = SafeBuf::try_get_u8(buf).context(DecodeKey)?;
        ensure!(prefix == TABLE_PREFIX, InvalidKeyPrefix);

        let table_id = memcomparable::decode_i64(buf).context(DecodeDatum)?;

        let mut sep = [0u8; 2];
        SafeBuf::try_copy_to_slice(buf, &mut sep).context(DecodeKey)?;
        ensure!(&sep[..] == RECORD_PREFIX_SEP, InvalidKeyPrefix);

        let handle = memcomparable::decode_i64(buf).context(DecodeDatum)?;

        Ok((table_id, handle))
    }
}

impl RowKeyEncoder {
    pub fn encode_to_vec(&self, table_id: TableId, handle: Handle) -> Result<Vec<u8>> {
        let row_key = (table_id, handle);
        let mut buf = BytesMut::with_capacity(self.estimate_encoded_size(&row_key));
        self.encode(&mut buf, &row_key)?;
        Ok(buf.to_vec())
    }
}

/// Encoder of the keys of one index.
#[derive(Debug, Clone)]
pub struct IndexKeyEncoder {
    table_id: TableId,
    index_id: i64,
    unique: bool,
    col_offsets: Vec<usize>,
}

impl IndexKeyEncoder {
    pub fn from_schema(table_id: TableId, index: &IndexSchema) -> Self {
        Self {
            table_id,
            index_id: index.id,
            unique: index.unique,
            col_offsets: index.col_offsets.clone(),
        }
    }

    /// Key format:
    ///
    /// ```text
    /// +-----+------------------+------+------------------+---------------+----------------+
    /// | 't' | table_id(enc i64)| "_i" | index_id(enc i64)| datum...      | handle(enc i64)|
    /// +-----+------------------+------+------------------+---------------+----------------+
    /// ```
    ///
    /// Unique indices stop after the datums; the handle tail exists only on
    /// non-unique indices to keep their keys distinct per row.
    pub fn encode<B: SafeBufMut>(&self, buf: &mut B, row: &Row, handle: Handle) -> Result<()> {
        buf.try_put_u8(TABLE_PREFIX).context(EncodeKey)?;
        memcomparable::encode_i64(buf, self.table_id).context(EncodeDatum)?;
        buf.try_put(INDEX_PREFIX_SEP).context(EncodeKey)?;
        memcomparable::encode_i64(buf, self.index_id).context(EncodeDatum)?;
        for offset in &self.col_offsets {
            encode_key_datum(buf, row.column(*offset))?;
        }
        if !self.unique {
            memcomparable::encode_i64(buf, handle).context(EncodeDatum)?;
        }

        Ok(())
    }

    pub fn encode_to_vec(&self, row: &Row, handle: Handle) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, row, handle)?;
        Ok(buf.to_vec())
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// Encoder of row values.
///
/// Value format is a sequence of `(column_id, datum)` pairs in column order:
///
/// ```text
/// +---------------------+------------+---------------------+------------+-----+
/// | column_id(varint)   | datum      | column_id(varint)   | datum      | ... |
/// +---------------------+------------+---------------------+------------+-----+
/// ```
///
/// Null columns are simply absent. When the primary key doubles as the
/// handle, its column is omitted too: the handle is recoverable from the row
/// key. A value that would end up empty encodes a single NIL flag byte so a
/// stored row is never an empty value (the empty value is the delete
/// sentinel on the wire).
#[derive(Debug, Clone)]
pub struct RowValueEncoder<'a> {
    table: &'a TableInfo,
}

impl<'a> RowValueEncoder<'a> {
    pub fn new(table: &'a TableInfo) -> Self {
        Self { table }
    }
}

impl<'a> Encoder<Row> for RowValueEncoder<'a> {
    type Error = Error;

    fn encode<B: BufMut>(&self, buf: &mut B, row: &Row) -> Result<()> {
        let mut wrote = false;
        for column in &self.table.columns {
            if self.table.pk_is_handle && Some(column.offset) == self.table.handle_offset {
                continue;
            }
            let datum = row.column(column.offset);
            if datum.is_null() {
                continue;
            }

            var::encode_varint(buf, column.id).context(EncodeVar)?;
            encode_value_datum(buf, datum)?;
            wrote = true;
        }

        if !wrote {
            buf.try_put_u8(NIL_FLAG).context(EncodeKey)?;
        }

        Ok(())
    }

    fn estimate_encoded_size(&self, row: &Row) -> usize {
        let mut size = 1;
        for datum in row.iter() {
            size += 10 + estimate_datum_size(datum);
        }
        size
    }
}

impl<'a> RowValueEncoder<'a> {
    pub fn encode_to_vec(&self, row: &Row) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.estimate_encoded_size(row));
        self.encode(&mut buf, row)?;
        Ok(buf.to_vec())
    }
}

/// Decoder of row values, rebuilding the full internal row.
#[derive(Debug, Clone)]
pub struct RowValueDecoder<'a> {
    table: &'a TableInfo,
}

impl<'a> RowValueDecoder<'a> {
    pub fn new(table: &'a TableInfo) -> Self {
        Self { table }
    }

    /// Decode `value` into a row; `handle` fills the handle column of
    /// pk-is-handle tables.
    pub fn decode(&self, value: &[u8], handle: Handle) -> Result<Row> {
        let mut row = Row::new_null(self.table.num_columns());
        let mut buf = value;

        // A single NIL flag byte stands for "no stored columns".
        if buf.len() == 1 && buf[0] == NIL_FLAG {
            buf = &buf[1..];
        }

        while !buf.is_empty() {
            let column_id = var::decode_varint(&mut buf).context(DecodeVar)?;
            let datum = decode_datum(&mut buf)?;

            let column = self
                .table
                .columns
                .iter()
                .find(|c| c.id == column_id)
                .context(UnknownColumnId { column_id })?;
            let datum = datum
                .convert_to(column.kind)
                .context(ConvertDatum { column_id })?;
            row.set_column(column.offset, datum);
        }

        if self.table.pk_is_handle {
            if let Some(offset) = self.table.handle_offset {
                let kind = self.table.columns[offset].kind;
                let datum = if kind == DatumKind::UInt {
                    Datum::UInt(handle as u64)
                } else {
                    Datum::Int(handle)
                };
                row.set_column(offset, datum);
            }
        }

        Ok(row)
    }
}

/// Encode the stored value of a unique index entry: the handle as signed
/// big-endian, 8 bytes.
pub fn encode_index_handle(handle: Handle) -> Vec<u8> {
    handle.to_be_bytes().to_vec()
}

/// Decode the handle out of a unique index value.
pub fn decode_index_handle(value: &[u8]) -> Result<Handle> {
    ensure!(value.len() == 8, InvalidIndexValue { len: value.len() });
    let mut raw = [0u8; 8];
    raw.copy_from_slice(value);
    Ok(Handle::from_be_bytes(raw))
}

fn encode_key_datum<B: SafeBufMut>(buf: &mut B, datum: &Datum) -> Result<()> {
    match datum {
        Datum::Null => buf.try_put_u8(NIL_FLAG).context(EncodeKey),
        Datum::Int(v) => {
            buf.try_put_u8(INT_FLAG).context(EncodeKey)?;
            memcomparable::encode_i64(buf, *v).context(EncodeDatum)
        }
        Datum::UInt(v) => {
            buf.try_put_u8(UINT_FLAG).context(EncodeKey)?;
            memcomparable::encode_u64(buf, *v).context(EncodeDatum)
        }
        Datum::Double(v) => {
            buf.try_put_u8(FLOAT_FLAG).context(EncodeKey)?;
            memcomparable::encode_f64(buf, *v).context(EncodeDatum)
        }
        Datum::String(v) => {
            buf.try_put_u8(BYTES_FLAG).context(EncodeKey)?;
            memcomparable::encode_bytes(buf, v.as_bytes()).context(EncodeDatum)
        }
        Datum::Bytes(v) => {
            buf.try_put_u8(BYTES_FLAG).context(EncodeKey)?;
            memcomparable::encode_bytes(buf, v).context(EncodeDatum)
        }
    }
}

fn encode_value_datum<B: SafeBufMut>(buf: &mut B, datum: &Datum) -> Result<()> {
    match datum {
        Datum::Null => buf.try_put_u8(NIL_FLAG).context(EncodeKey),
        Datum::Int(v) => {
            buf.try_put_u8(VARINT_FLAG).context(EncodeKey)?;
            var::encode_varint(buf, *v).context(EncodeVar)
        }
        Datum::UInt(v) => {
            buf.try_put_u8(UVARINT_FLAG).context(EncodeKey)?;
            var::encode_uvarint(buf, *v).context(EncodeVar)
        }
        Datum::Double(v) => {
            buf.try_put_u8(FLOAT_FLAG).context(EncodeKey)?;
            memcomparable::encode_f64(buf, *v).context(EncodeDatum)
        }
        Datum::String(v) => {
            buf.try_put_u8(COMPACT_BYTES_FLAG).context(EncodeKey)?;
            var::encode_uvarint(buf, v.len() as u64).context(EncodeVar)?;
            buf.try_put(v.as_bytes()).context(EncodeKey)
        }
        Datum::Bytes(v) => {
            buf.try_put_u8(COMPACT_BYTES_FLAG).context(EncodeKey)?;
            var::encode_uvarint(buf, v.len() as u64).context(EncodeVar)?;
            buf.try_put(v).context(EncodeKey)
        }
    }
}

/// Decode one datum, key or value form; the flag byte disambiguates.
fn decode_datum(buf: &mut &[u8]) -> Result<Datum> {
    let flag = SafeBuf::try_get_u8(buf).context(DecodeKey)?;
    match flag {
        NIL_FLAG => Ok(Datum::Null),
        INT_FLAG => Ok(Datum::Int(
            memcomparable::decode_i64(buf).context(DecodeDatum)?,
        )),
        UINT_FLAG => Ok(Datum::UInt(
            memcomparable::decode_u64(buf).context(DecodeDatum)?,
        )),
        FLOAT_FLAG => Ok(Datum::Double(
            memcomparable::decode_f64(buf).context(DecodeDatum)?,
        )),
        BYTES_FLAG => Ok(Datum::Bytes(
            memcomparable::decode_bytes(buf).context(DecodeDatum)?,
        )),
        COMPACT_BYTES_FLAG => {
            let len = var::decode_uvarint(buf).context(DecodeVar)? as usize;
            let mut data = vec![0u8; len];
            SafeBuf::try_copy_to_slice(buf, &mut data).context(DecodeKey)?;
            Ok(Datum::Bytes(data))
        }
        VARINT_FLAG => Ok(Datum::Int(var::decode_varint(buf).context(DecodeVar)?)),
        UVARINT_FLAG => Ok(Datum::UInt(var::decode_uvarint(buf).context(DecodeVar)?)),
        _ => InvalidFlag { flag }.fail(),
    }
}

fn estimate_datum_size(datum: &Datum) -> usize {
    match datum {
        Datum::Null => 1,
        Datum::Int(_) | Datum::UInt(_) | Datum::Double(_) => 9,
        Datum::String(v) => memcomparable::encoded_bytes_len(v.as_bytes()) + 1,
        Datum::Bytes(v) => memcomparable::encoded_bytes_len(v) + 1,
    }
}
