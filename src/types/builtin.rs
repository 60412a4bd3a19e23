//! Built-in scalar codecs (text format).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::PgType;

/// A codec built from a pair of plain functions.
struct Builtin {
    oid: Oid,
    name: &'static str,
    decode: fn(&[u8]) -> Result<Value>,
    encode: fn(&Value) -> Result<Vec<u8>>,
}

impl PgType for Builtin {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        self.name
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        (self.decode)(bytes)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        (self.encode)(value)
    }
}

pub(super) fn codecs() -> Vec<Arc<dyn PgType>> {
    let table: &[(Oid, &'static str, fn(&[u8]) -> Result<Value>, fn(&Value) -> Result<Vec<u8>>)] = &[
        (oid::BOOL, "bool", decode_bool, encode_bool),
        (oid::BYTEA, "bytea", decode_bytea, encode_bytea),
        (oid::CHAR, "char", decode_char, encode_char),
        (oid::NAME, "name", decode_text, encode_text),
        (oid::INT8, "int8", decode_int8, encode_integer),
        (oid::INT2, "int2", decode_int2, encode_integer),
        (oid::INT4, "int4", decode_int4, encode_integer),
        (oid::TEXT, "text", decode_text, encode_text),
        (oid::OID, "oid", decode_oid, encode_integer),
        (oid::JSON, "json", decode_json, encode_text),
        (oid::FLOAT4, "float4", decode_float4, encode_float),
        (oid::FLOAT8, "float8", decode_float8, encode_float),
        (oid::BPCHAR, "bpchar", decode_text, encode_text),
        (oid::VARCHAR, "varchar", decode_text, encode_text),
        (oid::NUMERIC, "numeric", decode_numeric, encode_text),
        (oid::JSONB, "jsonb", decode_json, encode_text),
        #[cfg(feature = "with-chrono")]
        (oid::DATE, "date", chrono_codec::decode_date, chrono_codec::encode),
        #[cfg(feature = "with-chrono")]
        (oid::TIME, "time", chrono_codec::decode_time, chrono_codec::encode),
        #[cfg(feature = "with-chrono")]
        (oid::TIMESTAMP, "timestamp", chrono_codec::decode_timestamp, chrono_codec::encode),
        #[cfg(feature = "with-chrono")]
        (oid::TIMESTAMPTZ, "timestamptz", chrono_codec::decode_timestamptz, chrono_codec::encode),
        #[cfg(feature = "with-uuid")]
        (oid::UUID, "uuid", decode_uuid, encode_uuid),
    ];

    table
        .iter()
        .map(|&(oid, name, decode, encode)| {
            Arc::new(Builtin {
                oid,
                name,
                decode,
                encode,
            }) as Arc<dyn PgType>
        })
        .collect()
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::InvalidUsage(format!("cannot encode {:?} as {}", value, expected))
}

fn decode_bool(bytes: &[u8]) -> Result<Value> {
    match bytes {
        b"t" | b"true" => Ok(Value::Bool(true)),
        b"f" | b"false" => Ok(Value::Bool(false)),
        _ => Err(Error::Decode(format!(
            "invalid boolean: {:?}",
            String::from_utf8_lossy(bytes)
        ))),
    }
}

fn encode_bool(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bool(true) => Ok(b"t".to_vec()),
        Value::Bool(false) => Ok(b"f".to_vec()),
        other => Err(mismatch("bool", other)),
    }
}

fn decode_bytea(bytes: &[u8]) -> Result<Value> {
    let hex = bytes
        .strip_prefix(b"\\x")
        .ok_or_else(|| Error::Decode("bytea is not in hex format".into()))?;
    decode_hex(hex).map(Value::Bytea)
}

fn encode_bytea(value: &Value) -> Result<Vec<u8>> {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    match value {
        Value::Bytea(bytes) => {
            let mut out = Vec::with_capacity(2 + bytes.len() * 2);
            out.extend_from_slice(b"\\x");
            for b in bytes {
                out.push(DIGITS[(b >> 4) as usize]);
                out.push(DIGITS[(b & 0x0f) as usize]);
            }
            Ok(out)
        }
        other => Err(mismatch("bytea", other)),
    }
}

/// Decode hex digits to bytes.
pub(crate) fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        result.push((high << 4) | low);
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

fn decode_char(bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(Value::Char('\0')),
        (Some(c), None) => Ok(Value::Char(c)),
        _ => Err(Error::Decode(format!("invalid \"char\" value: {:?}", s))),
    }
}

fn encode_char(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Char(c) => Ok(c.to_string().into_bytes()),
        other => Err(mismatch("\"char\"", other)),
    }
}

fn decode_text(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Text(s.to_string()))
}

fn encode_text(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Text(s) | Value::Json(s) | Value::Numeric(s) => Ok(s.as_bytes().to_vec()),
        other => Err(mismatch("text", other)),
    }
}

fn decode_json(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Json(s.to_string()))
}

fn decode_numeric(bytes: &[u8]) -> Result<Value> {
    utf8(bytes).map(|s| Value::Numeric(s.to_string()))
}

fn parse<T: std::str::FromStr>(bytes: &[u8], type_name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    utf8(bytes)?
        .parse()
        .map_err(|e| Error::Decode(format!("invalid {}: {}", type_name, e)))
}

fn decode_int2(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "int2").map(Value::Int2)
}

fn decode_int4(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "int4").map(Value::Int4)
}

fn decode_int8(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "int8").map(Value::Int8)
}

fn decode_oid(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "oid").map(Value::Oid)
}

fn encode_integer(value: &Value) -> Result<Vec<u8>> {
    value
        .as_i64()
        .map(|v| v.to_string().into_bytes())
        .ok_or_else(|| mismatch("integer", value))
}

fn decode_float4(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "float4").map(Value::Float4)
}

fn decode_float8(bytes: &[u8]) -> Result<Value> {
    parse(bytes, "float8").map(Value::Float8)
}

fn encode_float(value: &Value) -> Result<Vec<u8>> {
    let text = match *value {
        Value::Float4(v) => float_text(f64::from(v)).unwrap_or_else(|| v.to_string()),
        Value::Float8(v) => float_text(v).unwrap_or_else(|| v.to_string()),
        ref other => return Err(mismatch("float", other)),
    };
    Ok(text.into_bytes())
}

/// Spelling of the non-finite floats PostgreSQL accepts.
fn float_text(v: f64) -> Option<String> {
    if v.is_nan() {
        Some("NaN".to_string())
    } else if v == f64::INFINITY {
        Some("Infinity".to_string())
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity".to_string())
    } else {
        None
    }
}

#[cfg(feature = "with-uuid")]
fn decode_uuid(bytes: &[u8]) -> Result<Value> {
    uuid::Uuid::parse_str(utf8(bytes)?)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))
}

#[cfg(feature = "with-uuid")]
fn encode_uuid(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Uuid(u) => Ok(u.hyphenated().to_string().into_bytes()),
        other => Err(mismatch("uuid", other)),
    }
}

#[cfg(feature = "with-chrono")]
mod chrono_codec {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

    use super::{mismatch, utf8};
    use crate::error::{Error, Result};
    use crate::value::Value;

    pub(super) const DATE: &str = "%Y-%m-%d";
    pub(super) const TIME: &str = "%H:%M:%S%.f";
    pub(super) const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.f";
    /// Offsets arrive as `+HH` or `+HH:MM`
    pub(super) const TIMESTAMPTZ_IN: &str = "%Y-%m-%d %H:%M:%S%.f%#z";
    pub(super) const TIMESTAMPTZ_OUT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

    fn invalid(kind: &str, e: chrono::ParseError) -> Error {
        Error::Decode(format!("invalid {}: {}", kind, e))
    }

    pub(super) fn decode_date(bytes: &[u8]) -> Result<Value> {
        NaiveDate::parse_from_str(utf8(bytes)?, DATE)
            .map(Value::Date)
            .map_err(|e| invalid("date", e))
    }

    pub(super) fn decode_time(bytes: &[u8]) -> Result<Value> {
        NaiveTime::parse_from_str(utf8(bytes)?, TIME)
            .map(Value::Time)
            .map_err(|e| invalid("time", e))
    }

    pub(super) fn decode_timestamp(bytes: &[u8]) -> Result<Value> {
        NaiveDateTime::parse_from_str(utf8(bytes)?, TIMESTAMP)
            .map(Value::Timestamp)
            .map_err(|e| invalid("timestamp", e))
    }

    pub(super) fn decode_timestamptz(bytes: &[u8]) -> Result<Value> {
        DateTime::parse_from_str(utf8(bytes)?, TIMESTAMPTZ_IN)
            .map(Value::TimestampTz)
            .map_err(|e| invalid("timestamptz", e))
    }

    pub(super) fn encode(value: &Value) -> Result<Vec<u8>> {
        let text = match value {
            Value::Date(d) => d.format(DATE).to_string(),
            Value::Time(t) => t.format(TIME).to_string(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP).to_string(),
            Value::TimestampTz(ts) => ts.format(TIMESTAMPTZ_OUT).to_string(),
            other => return Err(mismatch("date/time", other)),
        };
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::types::oid;
    use crate::types::TypeRegistry;
    use crate::value::Value;

    fn decode(oid: u32, text: &str) -> Value {
        TypeRegistry::new().decode(oid, Some(text.as_bytes())).unwrap()
    }

    fn encode(value: Value) -> String {
        let bytes = TypeRegistry::new().encode(&value).unwrap().unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn scalars() {
        assert_eq!(decode(oid::BOOL, "t"), Value::Bool(true));
        assert_eq!(decode(oid::INT2, "-7"), Value::Int2(-7));
        assert_eq!(decode(oid::INT8, "9000000000"), Value::Int8(9_000_000_000));
        assert_eq!(decode(oid::FLOAT8, "-Infinity"), Value::Float8(f64::NEG_INFINITY));
        assert_eq!(decode(oid::NUMERIC, "1.10"), Value::Numeric("1.10".into()));
        assert_eq!(decode(oid::JSONB, "{\"a\": 1}"), Value::Json("{\"a\": 1}".into()));
        assert_eq!(decode(oid::CHAR, "x"), Value::Char('x'));
    }

    #[test]
    fn bad_integer_is_decode_error() {
        let err = TypeRegistry::new()
            .decode(oid::INT4, Some(b"12x"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Decode(_)));
    }

    #[test]
    fn bytea_hex() {
        assert_eq!(
            decode(oid::BYTEA, "\\xDEADbeef"),
            Value::Bytea(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(encode(Value::Bytea(vec![0x00, 0xff])), "\\x00ff");
    }

    #[test]
    fn encodings() {
        assert_eq!(encode(Value::Bool(false)), "f");
        assert_eq!(encode(Value::Int8(-12)), "-12");
        assert_eq!(encode(Value::Float8(f64::NAN)), "NaN");
        assert_eq!(encode(Value::Float4(1.5)), "1.5");
        assert_eq!(encode(Value::Numeric("3.14159".into())), "3.14159");
    }

    #[cfg(feature = "with-chrono")]
    #[test]
    fn timestamptz_short_offset() {
        let value = decode(oid::TIMESTAMPTZ, "2024-03-01 12:30:00.25+02");
        let Value::TimestampTz(ts) = &value else {
            panic!("expected timestamptz, got {:?}", value);
        };
        assert_eq!(ts.offset().local_minus_utc(), 7200);
        assert_eq!(encode(value), "2024-03-01 12:30:00.250+02:00");
    }

    #[cfg(feature = "with-uuid")]
    #[test]
    fn uuid_text() {
        let text = "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11";
        let value = decode(oid::UUID, text);
        assert_eq!(encode(value), text);
    }
}
