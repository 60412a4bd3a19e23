//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{
    Authentication, BackendKeyData, NegotiateProtocolVersion, NotificationResponse,
    ParameterStatus,
};
pub use error::{ErrorResponse, NoticeResponse};
pub use extended::ParameterDescription;
pub use query::{CommandComplete, DataRow, FieldDescription, RowDescription};

use crate::error::Result;
use crate::protocol::types::TransactionStatus;

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
    /// NegotiateProtocolVersion
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// A decoded message from the PostgreSQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete,
    CloseComplete,
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse,
    ErrorResponse(ErrorResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData,
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete,
    PortalSuspended,
    ReadyForQuery(TransactionStatus),
    RowDescription(RowDescription),
}

impl BackendMessage {
    /// Decode a message body given its tag byte.
    ///
    /// Returns `Ok(None)` for tags this client does not understand; the caller
    /// skips the frame.
    pub fn decode(type_byte: u8, payload: &[u8]) -> Result<Option<Self>> {
        use extended::parse_empty;

        let msg = match type_byte {
            msg_type::AUTHENTICATION => Self::Authentication(Authentication::parse(payload)?),
            msg_type::BACKEND_KEY_DATA => Self::BackendKeyData(BackendKeyData::parse(payload)?),
            msg_type::BIND_COMPLETE => {
                parse_empty(payload, "BindComplete")?;
                Self::BindComplete
            }
            msg_type::CLOSE_COMPLETE => {
                parse_empty(payload, "CloseComplete")?;
                Self::CloseComplete
            }
            msg_type::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete::parse(payload)?),
            msg_type::DATA_ROW => Self::DataRow(DataRow::parse(payload)?),
            msg_type::EMPTY_QUERY_RESPONSE => {
                parse_empty(payload, "EmptyQueryResponse")?;
                Self::EmptyQueryResponse
            }
            msg_type::ERROR_RESPONSE => Self::ErrorResponse(ErrorResponse::parse(payload)?),
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                Self::NegotiateProtocolVersion(NegotiateProtocolVersion::parse(payload)?)
            }
            msg_type::NO_DATA => {
                parse_empty(payload, "NoData")?;
                Self::NoData
            }
            msg_type::NOTICE_RESPONSE => Self::NoticeResponse(NoticeResponse::parse(payload)?),
            msg_type::NOTIFICATION_RESPONSE => {
                Self::NotificationResponse(NotificationResponse::parse(payload)?)
            }
            msg_type::PARAMETER_DESCRIPTION => {
                Self::ParameterDescription(ParameterDescription::parse(payload)?)
            }
            msg_type::PARAMETER_STATUS => Self::ParameterStatus(ParameterStatus::parse(payload)?),
            msg_type::PARSE_COMPLETE => {
                parse_empty(payload, "ParseComplete")?;
                Self::ParseComplete
            }
            msg_type::PORTAL_SUSPENDED => {
                parse_empty(payload, "PortalSuspended")?;
                Self::PortalSuspended
            }
            msg_type::READY_FOR_QUERY => {
                Self::ReadyForQuery(auth::parse_ready_for_query(payload)?)
            }
            msg_type::ROW_DESCRIPTION => Self::RowDescription(RowDescription::parse(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Append the complete framed message to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        use extended::write_empty;

        match self {
            Self::Authentication(auth) => auth.write(buf),
            Self::BackendKeyData(key) => key.write(buf),
            Self::BindComplete => write_empty(buf, msg_type::BIND_COMPLETE),
            Self::CloseComplete => write_empty(buf, msg_type::CLOSE_COMPLETE),
            Self::CommandComplete(complete) => complete.write(buf),
            Self::DataRow(row) => row.write(buf),
            Self::EmptyQueryResponse => write_empty(buf, msg_type::EMPTY_QUERY_RESPONSE),
            Self::ErrorResponse(err) => err.write(buf),
            Self::NegotiateProtocolVersion(negotiate) => negotiate.write(buf),
            Self::NoData => write_empty(buf, msg_type::NO_DATA),
            Self::NoticeResponse(notice) => notice.write(buf),
            Self::NotificationResponse(notification) => notification.write(buf),
            Self::ParameterDescription(desc) => desc.write(buf),
            Self::ParameterStatus(status) => status.write(buf),
            Self::ParseComplete => write_empty(buf, msg_type::PARSE_COMPLETE),
            Self::PortalSuspended => write_empty(buf, msg_type::PORTAL_SUSPENDED),
            Self::ReadyForQuery(status) => auth::write_ready_for_query(buf, *status),
            Self::RowDescription(desc) => desc.write(buf),
        }
    }

    /// Message name for logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::BindComplete => "BindComplete",
            Self::CloseComplete => "CloseComplete",
            Self::CommandComplete(_) => "CommandComplete",
            Self::DataRow(_) => "DataRow",
            Self::EmptyQueryResponse => "EmptyQueryResponse",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::NegotiateProtocolVersion(_) => "NegotiateProtocolVersion",
            Self::NoData => "NoData",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::NotificationResponse(_) => "NotificationResponse",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ParseComplete => "ParseComplete",
            Self::PortalSuspended => "PortalSuspended",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::RowDescription(_) => "RowDescription",
        }
    }

    /// Check if this message can arrive at any time, outside a request/response exchange.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::NoticeResponse(_) | Self::NotificationResponse(_) | Self::ParameterStatus(_)
        )
    }
}
