//! bytea implementations (`Vec<u8>`).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue};

impl FromWireValue<'_> for Vec<u8> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(Error::Decode(format!(
                "cannot decode oid {} as Vec<u8>",
                oid
            )));
        }
        // Text format for bytea is hex-encoded: \xDEADBEEF
        let hex = bytes
            .strip_prefix(b"\\x")
            .ok_or_else(|| Error::Decode("bytea is not in hex format".into()))?;
        crate::types::decode_hex(hex)
    }
}

impl ToWireValue for [u8] {
    fn to_value(&self) -> Value {
        Value::Bytea(self.to_vec())
    }
}

impl ToWireValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytea(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytea_hex() {
        assert_eq!(
            Vec::<u8>::from_text(oid::BYTEA, b"\\xDEADBEEF").unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert!(Vec::<u8>::from_text(oid::BYTEA, b"DEADBEEF").is_err());
    }
}
