//! Error and notice response messages.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{MessageBuilder, expect_end, read_cstr, read_u8};

use super::msg_type;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Internal position
    pub const INTERNAL_POSITION: u8 = b'p';
    /// Internal query
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Data type name
    pub const DATA_TYPE: u8 = b'd';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// File name
    pub const FILE: u8 = b'F';
    /// Line number
    pub const LINE: u8 = b'L';
    /// Routine name
    pub const ROUTINE: u8 = b'R';
}

/// Parse error/notice fields from payload.
fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    loop {
        let (field_type, rest) = read_u8(data)?;
        if field_type == 0 {
            expect_end(rest, "ErrorResponse")?;
            break;
        }

        let (value, rest) = read_cstr(rest)?;
        data = rest;

        match field_type {
            field_type::SEVERITY => fields.severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => {
                fields.severity_non_localized = Some(value.to_string())
            }
            field_type::CODE => fields.code = Some(value.to_string()),
            field_type::MESSAGE => fields.message = Some(value.to_string()),
            field_type::DETAIL => fields.detail = Some(value.to_string()),
            field_type::HINT => fields.hint = Some(value.to_string()),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = Some(value.to_string()),
            field_type::WHERE => fields.where_ = Some(value.to_string()),
            field_type::SCHEMA => fields.schema = Some(value.to_string()),
            field_type::TABLE => fields.table = Some(value.to_string()),
            field_type::COLUMN => fields.column = Some(value.to_string()),
            field_type::DATA_TYPE => fields.data_type = Some(value.to_string()),
            field_type::CONSTRAINT => fields.constraint = Some(value.to_string()),
            field_type::FILE => fields.file = Some(value.to_string()),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = Some(value.to_string()),
            _ => {
                tracing::debug!("Unknown error field type: {}", field_type as char);
            }
        }
    }

    Ok(fields)
}

/// Encode error/notice fields followed by the terminating zero byte.
fn write_fields(msg: &mut MessageBuilder<'_>, fields: &ErrorFields) {
    let mut field = |code: u8, value: Option<&str>| {
        if let Some(value) = value {
            msg.write_u8(code);
            msg.write_cstr(value);
        }
    };
    let position = fields.position.map(|p| p.to_string());
    let internal_position = fields.internal_position.map(|p| p.to_string());
    let line = fields.line.map(|l| l.to_string());

    field(field_type::SEVERITY, fields.severity.as_deref());
    field(field_type::SEVERITY_NON_LOCALIZED, fields.severity_non_localized.as_deref());
    field(field_type::CODE, fields.code.as_deref());
    field(field_type::MESSAGE, fields.message.as_deref());
    field(field_type::DETAIL, fields.detail.as_deref());
    field(field_type::HINT, fields.hint.as_deref());
    field(field_type::POSITION, position.as_deref());
    field(field_type::INTERNAL_POSITION, internal_position.as_deref());
    field(field_type::INTERNAL_QUERY, fields.internal_query.as_deref());
    field(field_type::WHERE, fields.where_.as_deref());
    field(field_type::SCHEMA, fields.schema.as_deref());
    field(field_type::TABLE, fields.table.as_deref());
    field(field_type::COLUMN, fields.column.as_deref());
    field(field_type::DATA_TYPE, fields.data_type.as_deref());
    field(field_type::CONSTRAINT, fields.constraint.as_deref());
    field(field_type::FILE, fields.file.as_deref());
    field(field_type::LINE, line.as_deref());
    field(field_type::ROUTINE, fields.routine.as_deref());
    msg.write_u8(0);
}

/// ErrorResponse message - error from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::ERROR_RESPONSE);
        write_fields(&mut msg, &self.fields);
        msg.finish();
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    /// Get the primary message.
    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }

    /// Get the severity.
    pub fn severity(&self) -> Option<&str> {
        self.fields.severity()
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::NOTICE_RESPONSE);
        write_fields(&mut msg, &self.fields);
        msg.finish();
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    /// Get the primary message.
    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }

    /// Get the severity.
    pub fn severity(&self) -> Option<&str> {
        self.fields.severity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_ignored() {
        let payload = b"SERROR\0C42601\0Msyntax error\0Zsomething new\0\0";
        let err = ErrorResponse::parse(payload).unwrap();
        assert_eq!(err.severity(), Some("ERROR"));
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(err.message(), Some("syntax error"));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        assert!(ErrorResponse::parse(b"SERROR\0").is_err());
        assert!(ErrorResponse::parse(b"SERROR\0\0extra").is_err());
    }

    #[test]
    fn position_is_numeric() {
        let err = ErrorResponse::parse(b"SERROR\0P17\0\0").unwrap();
        assert_eq!(err.fields.position, Some(17));
    }
}
