// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Datum holds the value of one column in one row.

use common_util::define_result;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Invalid conversion, from:{:?}, to:{:?}.\nBacktrace:\n{}",
        from,
        to,
        backtrace
    ))]
    InvalidConversion {
        from: DatumKind,
        to: DatumKind,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Value out of range for target kind, to:{:?}.\nBacktrace:\n{}",
        to,
        backtrace
    ))]
    ValueOutOfRange { to: DatumKind, backtrace: Backtrace },
}

define_result!(Error);

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatumKind {
    Null,
    Int,
    UInt,
    Double,
    String,
    Bytes,
}

/// Value of one column in one row.
///
/// The input side may carry looser types than the table declares; values are
/// canonicalized to the declared kind via [Datum::convert_to] before any key
/// or value encoding happens.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn kind(&self) -> DatumKind {
        match self {
            Datum::Null => DatumKind::Null,
            Datum::Int(_) => DatumKind::Int,
            Datum::UInt(_) => DatumKind::UInt,
            Datum::Double(_) => DatumKind::Double,
            Datum::String(_) => DatumKind::String,
            Datum::Bytes(_) => DatumKind::Bytes,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            Datum::UInt(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    /// Canonicalize this datum to the declared column kind.
    ///
    /// Nulls pass through unchanged; nullability is enforced by the caller
    /// which knows the column constraints.
    pub fn convert_to(self, kind: DatumKind) -> Result<Datum> {
        if self.is_null() || self.kind() == kind {
            return Ok(self);
        }

        let from = self.kind();
        match (self, kind) {
            (Datum::Int(v), DatumKind::UInt) => {
                if v < 0 {
                    ValueOutOfRange { to: kind }.fail()
                } else {
                    Ok(Datum::UInt(v as u64))
                }
            }
            (Datum::UInt(v), DatumKind::Int) => {
                if v > i64::MAX as u64 {
                    ValueOutOfRange { to: kind }.fail()
                } else {
                    Ok(Datum::Int(v as i64))
                }
            }
            (Datum::Int(v), DatumKind::Double) => Ok(Datum::Double(v as f64)),
            (Datum::UInt(v), DatumKind::Double) => Ok(Datum::Double(v as f64)),
            (Datum::String(v), DatumKind::Bytes) => Ok(Datum::Bytes(v.into_bytes())),
            (Datum::Bytes(v), DatumKind::String) => match String::from_utf8(v) {
                Ok(s) => Ok(Datum::String(s)),
                Err(_) => InvalidConversion { from, to: kind }.fail(),
            },
            _ => InvalidConversion { from, to: kind }.fail(),
        }
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::UInt(v) => write!(f, "{}", v),
            Datum::Double(v) => write!(f, "{}", v),
            Datum::String(v) => write!(f, "{}", v),
            Datum::Bytes(v) => write!(f, "{:?}", v),
        }
    }
}
