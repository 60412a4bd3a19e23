//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{
    MessageBuilder, expect_end, read_bytes, read_cstr, read_i16, read_i32,
};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

use super::msg_type;

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

/// Field description within a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Field name
    pub name: String,
    /// Fixed-size metadata
    pub tail: FieldDescriptionTail,
}

impl FieldDescription {
    /// Describe a text-format column of the given type that is not backed by a table.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            tail: FieldDescriptionTail {
                table_oid: U32BE::new(0),
                column_id: I16BE::new(0),
                type_oid: U32BE::new(type_oid),
                type_size: I16BE::new(-1),
                type_modifier: I32BE::new(-1),
                format: U16BE::new(FormatCode::Text as u16),
            },
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table OID (0 if not a table column)
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    /// Column attribute number (0 if not a table column)
    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    /// Data type OID
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// Type size (-1 for variable, -2 for null-terminated)
    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    /// Type modifier (type-specific)
    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    /// Format code (0=text, 1=binary)
    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_fields, mut data) = read_i16(payload)?;
        if num_fields < 0 {
            return Err(Error::Protocol(format!(
                "RowDescription: negative field count {num_fields}"
            )));
        }

        let mut fields = Vec::with_capacity(num_fields as usize);
        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::read_from_bytes(tail)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription {
                name: name.to_string(),
                tail,
            });
            data = rest;
        }
        expect_end(data, "RowDescription")?;

        Ok(Self { fields })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::ROW_DESCRIPTION);
        msg.write_i16(self.fields.len() as i16);
        for field in &self.fields {
            msg.write_cstr(&field.name);
            msg.write_bytes(field.tail.as_bytes());
        }
        msg.finish();
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// DataRow message - contains a single row of data.
///
/// Each value is `None` for SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRow {
    pub values: Vec<Option<Vec<u8>>>,
}

impl DataRow {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_columns, mut data) = read_i16(payload)?;
        if num_columns < 0 {
            return Err(Error::Protocol(format!(
                "DataRow: negative column count {num_columns}"
            )));
        }

        let mut values = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let (len, rest) = read_i32(data)?;
            data = rest;
            match len {
                -1 => values.push(None),
                len if len < 0 => {
                    return Err(Error::Protocol(format!("DataRow: invalid value length {len}")));
                }
                len => {
                    let (value, rest) = read_bytes(data, len as usize)?;
                    values.push(Some(value.to_vec()));
                    data = rest;
                }
            }
        }
        expect_end(data, "DataRow")?;

        Ok(Self { values })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::DATA_ROW);
        msg.write_i16(self.values.len() as i16);
        for value in &self.values {
            match value {
                None => msg.write_i32(-1),
                Some(bytes) => {
                    msg.write_i32(bytes.len() as i32);
                    msg.write_bytes(bytes);
                }
            }
        }
        msg.finish();
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: String,
}

impl CommandComplete {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (tag, rest) = read_cstr(payload)?;
        expect_end(rest, "CommandComplete")?;
        Ok(Self {
            tag: tag.to_string(),
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::COMMAND_COMPLETE);
        msg.write_cstr(&self.tag);
        msg.finish();
    }

    /// Parse the number of rows affected from the command tag.
    ///
    /// Returns `Some(count)` for commands like SELECT, INSERT, UPDATE, DELETE.
    /// Returns `None` for other commands or parse failures.
    pub fn rows_affected(&self) -> Option<u64> {
        // Command tags are like:
        // - "SELECT 5"
        // - "INSERT 0 1" (oid, rows)
        // - "UPDATE 10"
        let parts: Vec<&str> = self.tag.split_whitespace().collect();

        match parts.as_slice() {
            ["SELECT", count] => count.parse().ok(),
            ["INSERT", _oid, count] => count.parse().ok(),
            ["UPDATE", count] => count.parse().ok(),
            ["DELETE", count] => count.parse().ok(),
            ["MERGE", count] => count.parse().ok(),
            ["COPY", count] => count.parse().ok(),
            ["MOVE", count] => count.parse().ok(),
            ["FETCH", count] => count.parse().ok(),
            _ => None,
        }
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}
