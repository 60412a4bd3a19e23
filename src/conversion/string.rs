//! String type implementations (&str, String).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue, text};

/// Types whose text form is handed out as a string as-is.
fn is_textual(oid: Oid) -> bool {
    matches!(
        oid,
        oid::TEXT
            | oid::VARCHAR
            | oid::BPCHAR
            | oid::NAME
            | oid::UNKNOWN
            | oid::JSON
            | oid::JSONB
            | oid::NUMERIC
    )
}

impl<'a> FromWireValue<'a> for &'a str {
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if !is_textual(oid) {
            return Err(Error::Decode(format!("cannot decode oid {} as str", oid)));
        }
        text(bytes)
    }
}

impl FromWireValue<'_> for String {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !is_textual(oid) {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as String",
                oid
            )));
        }
        text(bytes).map(str::to_owned)
    }
}

impl ToWireValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_owned())
    }
}

impl ToWireValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_text() {
        assert_eq!(String::from_text(oid::TEXT, b"hello").unwrap(), "hello");
        assert_eq!(<&str>::from_text(oid::NUMERIC, b"1.50").unwrap(), "1.50");
    }

    #[test]
    fn test_type_mismatch() {
        assert!(String::from_text(oid::INT4, b"1").is_err());
    }
}
