//! Type registry: maps type OIDs to text-format codecs.
//!
//! Every value on the wire is exchanged in text format. The registry turns
//! those bytes into [`Value`]s when a row is read dynamically, and turns
//! parameter [`Value`]s into wire bytes before a Bind is sent.

mod builtin;

pub(crate) use builtin::decode_hex;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::value::Value;

/// A text-format codec for one PostgreSQL type.
pub trait PgType: Send + Sync {
    /// The type OID handled by this codec.
    fn oid(&self) -> Oid;

    /// The type name, for diagnostics.
    fn name(&self) -> &str;

    /// Decode the text representation of a non-NULL value.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Encode a non-NULL value to its text representation.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
}

/// Registry of type codecs, shared by a connection and all of its handles.
#[derive(Clone)]
pub struct TypeRegistry {
    codecs: HashMap<Oid, Arc<dyn PgType>>,
}

impl TypeRegistry {
    /// A registry with the built-in scalar types.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for codec in builtin::codecs() {
            registry.codecs.insert(codec.oid(), codec);
        }
        registry
    }

    /// A registry without any codecs; every column decodes to [`Value::Raw`].
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec, replacing any codec for the same OID.
    pub fn register<T: PgType + 'static>(&mut self, codec: T) -> &mut Self {
        self.codecs.insert(codec.oid(), Arc::new(codec));
        self
    }

    /// Look up the codec for a type OID.
    pub fn get(&self, oid: Oid) -> Option<&dyn PgType> {
        self.codecs.get(&oid).map(|codec| codec.as_ref())
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.codecs.contains_key(&oid)
    }

    /// Decode a column value. Unknown OIDs pass the bytes through as [`Value::Raw`].
    pub fn decode(&self, oid: Oid, bytes: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        match self.codecs.get(&oid) {
            Some(codec) => codec.decode(bytes),
            None => Ok(Value::Raw {
                oid,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Encode a parameter value; `None` is SQL NULL.
    ///
    /// A value whose type has no codec is rejected as invalid usage.
    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>> {
        match value {
            Value::Null => Ok(None),
            Value::Raw { bytes, .. } => Ok(Some(bytes.clone())),
            value => {
                let oid = value.type_oid();
                let codec = self.codecs.get(&oid).ok_or_else(|| {
                    Error::InvalidUsage(format!("unsupported parameter type (oid {})", oid))
                })?;
                codec.encode(value).map(Some)
            }
        }
    }

    /// Encode a full parameter list.
    pub fn encode_params(&self, values: &[Value]) -> Result<Vec<Option<Vec<u8>>>> {
        values.iter().map(|value| self.encode(value)).collect()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.codecs.values().map(|c| c.name().to_string()).collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    struct Point;

    impl PgType for Point {
        fn oid(&self) -> Oid {
            600
        }

        fn name(&self) -> &str {
            "point"
        }

        fn decode(&self, bytes: &[u8]) -> Result<Value> {
            Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
        }

        fn encode(&self, value: &Value) -> Result<Vec<u8>> {
            match value {
                Value::Raw { bytes, .. } => Ok(bytes.clone()),
                _ => Err(Error::InvalidUsage("not a point".into())),
            }
        }
    }

    #[test]
    fn unknown_oid_passes_through() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.decode(600, Some(b"(1,2)")).unwrap(),
            Value::Raw {
                oid: 600,
                bytes: b"(1,2)".to_vec()
            }
        );
    }

    #[test]
    fn null_is_null_for_any_type() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.decode(oid::INT4, None).unwrap(), Value::Null);
        assert_eq!(registry.encode(&Value::Null).unwrap(), None);
    }

    #[test]
    fn encode_without_codec_is_usage_error() {
        let registry = TypeRegistry::empty();
        let err = registry.encode(&Value::Int4(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidUsage(_)));
    }

    #[test]
    fn registered_codec_wins() {
        let mut registry = TypeRegistry::new();
        registry.register(Point);
        assert_eq!(
            registry.decode(600, Some(b"(1,2)")).unwrap(),
            Value::Text("(1,2)".into())
        );
        assert_eq!(registry.get(600).map(|c| c.name()), Some("point"));
    }

    #[test]
    fn params_encode_in_order() {
        let registry = TypeRegistry::new();
        let encoded = registry
            .encode_params(&[Value::Int4(42), Value::Null, Value::Text("hi".into())])
            .unwrap();
        assert_eq!(
            encoded,
            vec![Some(b"42".to_vec()), None, Some(b"hi".to_vec())]
        );
    }
}
