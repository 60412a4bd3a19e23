//! Primitive type implementations (bool, integers, floats, char).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue, text};

// === Boolean ===

impl FromWireValue<'_> for bool {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(Error::Decode(format!("cannot decode oid {} as bool", oid)));
        }
        match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(true),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }
}

impl ToWireValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

// === Integer types ===

macro_rules! impl_integer {
    ($ty:ty, $variant:ident, [$($oid:path),+]) => {
        impl FromWireValue<'_> for $ty {
            fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
                if !matches!(oid, $($oid)|+) {
                    return Err(Error::Decode(format!(
                        "cannot decode oid {} as {}",
                        oid,
                        stringify!($ty)
                    )));
                }
                text(bytes)?
                    .parse()
                    .map_err(|e| Error::Decode(format!("invalid {}: {}", stringify!($ty), e)))
            }
        }

        impl ToWireValue for $ty {
            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }
        }
    };
}

impl_integer!(i16, Int2, [oid::INT2]);
impl_integer!(i32, Int4, [oid::INT2, oid::INT4]);
impl_integer!(i64, Int8, [oid::INT2, oid::INT4, oid::INT8]);
impl_integer!(u32, Oid, [oid::OID]);

// === Floating point ===

impl FromWireValue<'_> for f32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::FLOAT4 | oid::NUMERIC) {
            return Err(Error::Decode(format!("cannot decode oid {} as f32", oid)));
        }
        text(bytes)?
            .parse()
            .map_err(|e| Error::Decode(format!("invalid f32: {}", e)))
    }
}

impl ToWireValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float4(*self)
    }
}

impl FromWireValue<'_> for f64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::FLOAT4 | oid::FLOAT8 | oid::NUMERIC) {
            return Err(Error::Decode(format!("cannot decode oid {} as f64", oid)));
        }
        text(bytes)?
            .parse()
            .map_err(|e| Error::Decode(format!("invalid f64: {}", e)))
    }
}

impl ToWireValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float8(*self)
    }
}

// === "char" ===

impl FromWireValue<'_> for char {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::CHAR | oid::BPCHAR) {
            return Err(Error::Decode(format!("cannot decode oid {} as char", oid)));
        }
        let s = text(bytes)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::Decode(format!("invalid char: {:?}", s))),
        }
    }
}

impl ToWireValue for char {
    fn to_value(&self) -> Value {
        Value::Char(*self)
    }
}
