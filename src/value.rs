//! Dynamically typed column and parameter values.

use crate::protocol::types::{Oid, oid};

/// A decoded PostgreSQL value.
///
/// Produced by the [`TypeRegistry`](crate::types::TypeRegistry) when a row is
/// read without a static Rust type, and consumed by it when parameters are
/// encoded. Types without a registered codec decode to [`Value::Raw`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// The single-byte `"char"` type
    Char(char),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(u32),
    Float4(f32),
    Float8(f64),
    /// text, varchar, bpchar and name
    Text(String),
    Bytea(Vec<u8>),
    /// json and jsonb, kept as the server's text
    Json(String),
    /// numeric, kept as its exact decimal text
    Numeric(String),
    #[cfg(feature = "with-chrono")]
    Date(chrono::NaiveDate),
    #[cfg(feature = "with-chrono")]
    Time(chrono::NaiveTime),
    #[cfg(feature = "with-chrono")]
    Timestamp(chrono::NaiveDateTime),
    #[cfg(feature = "with-chrono")]
    TimestampTz(chrono::DateTime<chrono::FixedOffset>),
    #[cfg(feature = "with-uuid")]
    Uuid(uuid::Uuid),
    /// Wire bytes of a type the registry does not model
    Raw { oid: Oid, bytes: Vec<u8> },
}

impl Value {
    /// The type OID this value is encoded as.
    ///
    /// `Null` reports 0 so the server infers the parameter type.
    pub fn type_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Char(_) => oid::CHAR,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Oid(_) => oid::OID,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytea(_) => oid::BYTEA,
            Value::Json(_) => oid::JSON,
            Value::Numeric(_) => oid::NUMERIC,
            #[cfg(feature = "with-chrono")]
            Value::Date(_) => oid::DATE,
            #[cfg(feature = "with-chrono")]
            Value::Time(_) => oid::TIME,
            #[cfg(feature = "with-chrono")]
            Value::Timestamp(_) => oid::TIMESTAMP,
            #[cfg(feature = "with-chrono")]
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            #[cfg(feature = "with-uuid")]
            Value::Uuid(_) => oid::UUID,
            Value::Raw { oid, .. } => *oid,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text of a textual value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Json(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integer value to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int2(v) => Some(v.into()),
            Value::Int4(v) => Some(v.into()),
            Value::Int8(v) => Some(v),
            Value::Oid(v) => Some(v.into()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
