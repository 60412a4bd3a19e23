//! UUID type implementation (uuid crate).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue, text};

impl FromWireValue<'_> for uuid::Uuid {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::UUID {
            return Err(Error::Decode(format!("cannot decode oid {} as UUID", oid)));
        }
        uuid::Uuid::parse_str(text(bytes)?).map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))
    }
}

impl ToWireValue for uuid::Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}
