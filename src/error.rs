//! Error types for pg-conduit.

use std::time::Duration;

use thiserror::Error;

/// Result type for pg-conduit operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

/// Error type for pg-conduit.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server did not answer within the response timeout
    #[error("Timed out after {0:?} waiting for the server")]
    Timeout(Duration),

    /// Another operation, such as an open row stream, held the connection
    /// for longer than the response timeout. The connection stays usable.
    #[error("Connection busy for {0:?}; another operation still holds it")]
    Busy(Duration),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Connection was closed by `close()` or by the server
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Invalid usage (e.g., empty statement name)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A column value could not be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// An error plus a secondary failure raised while cleaning up after it
    #[error("{error} (cleanup also failed: {suppressed})")]
    Suppressed {
        error: Box<Error>,
        suppressed: Box<Error>,
    },
}

impl From<core::convert::Infallible> for Error {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::Protocol(_)
            | Error::Timeout(_)
            | Error::ConnectionBroken
            | Error::ConnectionClosed => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            Error::Suppressed { error, .. } => error.is_connection_broken(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Suppressed { error, .. } => error.sqlstate(),
            _ => None,
        }
    }

    /// Attach a secondary error raised while cleaning up after `self`.
    pub fn with_suppressed(self, suppressed: Error) -> Error {
        Error::Suppressed {
            error: Box::new(self),
            suppressed: Box::new(suppressed),
        }
    }

    /// The secondary error, if one was attached.
    pub fn suppressed(&self) -> Option<&Error> {
        match self {
            Error::Suppressed { suppressed, .. } => Some(suppressed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_server_error_breaks_connection() {
        let fields = ErrorFields {
            severity: Some("FATAL".into()),
            code: Some("57P01".into()),
            ..Default::default()
        };
        assert!(Error::Server(fields).is_connection_broken());

        let fields = ErrorFields {
            severity: Some("ERROR".into()),
            code: Some("42P01".into()),
            ..Default::default()
        };
        let err = Error::Server(fields);
        assert!(!err.is_connection_broken());
        assert_eq!(err.sqlstate(), Some("42P01"));
    }

    #[test]
    fn suppressed_keeps_primary() {
        let primary = Error::InvalidUsage("boom".into());
        let err = primary.with_suppressed(Error::ConnectionClosed);
        assert!(!err.is_connection_broken());
        assert!(matches!(err.suppressed(), Some(Error::ConnectionClosed)));
        assert!(err.to_string().starts_with("Invalid usage: boom"));
    }

    #[test]
    fn busy_is_not_fatal() {
        let busy = Error::Busy(Duration::from_millis(300));
        assert!(!busy.is_connection_broken());
        assert!(Error::Timeout(Duration::from_millis(300)).is_connection_broken());
    }
}
