//! PostgreSQL frontend (client → server) messages.

pub mod auth;
pub mod extended;
pub mod startup;

pub use auth::{ScramClient, md5_password};
pub use extended::Target;

use crate::error::{Error, Result};
use crate::protocol::codec::{
    MessageBuilder, expect_end, read_bytes, read_cstr, read_i16, read_i32, read_u8, read_u32,
};
use crate::protocol::types::Oid;

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Close (extended query protocol)
    pub const CLOSE: u8 = b'C';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// Flush (extended query protocol)
    pub const FLUSH: u8 = b'H';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by semicolons.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// A message sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Untagged startup packet
    Startup { params: Vec<(String, String)> },
    /// Untagged cancel packet, sent on its own connection
    CancelRequest { process_id: u32, secret_key: u32 },
    /// Cleartext or MD5-hashed password
    Password(String),
    SaslInitialResponse { mechanism: String, data: Vec<u8> },
    SaslResponse(Vec<u8>),
    Query(String),
    Parse {
        name: String,
        query: String,
        param_types: Vec<Oid>,
    },
    /// Bind with text-format parameters (`None` is NULL) and text results
    Bind {
        portal: String,
        statement: String,
        params: Vec<Option<Vec<u8>>>,
    },
    Describe { target: Target, name: String },
    Execute { portal: String, max_rows: u32 },
    Close { target: Target, name: String },
    Sync,
    Flush,
    Terminate,
}

impl FrontendMessage {
    /// Append the complete framed message to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Startup { params } => startup::write_startup(
                buf,
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            Self::CancelRequest {
                process_id,
                secret_key,
            } => startup::write_cancel_request(buf, *process_id, *secret_key),
            Self::Password(password) => auth::write_password(buf, password),
            Self::SaslInitialResponse { mechanism, data } => {
                auth::write_sasl_initial_response(buf, mechanism, data)
            }
            Self::SaslResponse(data) => auth::write_sasl_response(buf, data),
            Self::Query(query) => write_query(buf, query),
            Self::Parse {
                name,
                query,
                param_types,
            } => extended::write_parse(buf, name, query, param_types),
            Self::Bind {
                portal,
                statement,
                params,
            } => extended::write_bind(buf, portal, statement, params),
            Self::Describe { target, name } => extended::write_describe(buf, *target, name),
            Self::Execute { portal, max_rows } => extended::write_execute(buf, portal, *max_rows),
            Self::Close { target, name } => extended::write_close(buf, *target, name),
            Self::Sync => extended::write_sync(buf),
            Self::Flush => extended::write_flush(buf),
            Self::Terminate => startup::write_terminate(buf),
        }
    }

    /// Message name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "StartupMessage",
            Self::CancelRequest { .. } => "CancelRequest",
            Self::Password(_) => "PasswordMessage",
            Self::SaslInitialResponse { .. } => "SASLInitialResponse",
            Self::SaslResponse(_) => "SASLResponse",
            Self::Query(_) => "Query",
            Self::Parse { .. } => "Parse",
            Self::Bind { .. } => "Bind",
            Self::Describe { .. } => "Describe",
            Self::Execute { .. } => "Execute",
            Self::Close { .. } => "Close",
            Self::Sync => "Sync",
            Self::Flush => "Flush",
            Self::Terminate => "Terminate",
        }
    }

    /// Decode a tagged message body, as a server would.
    ///
    /// `p` is context-dependent on the wire; a body that parses as a
    /// SASLInitialResponse is reported as one, a single C string as a
    /// Password, and anything else as a SASLResponse.
    pub fn decode(type_byte: u8, payload: &[u8]) -> Result<Self> {
        let msg = match type_byte {
            msg_type::PASSWORD => decode_password(payload),
            msg_type::QUERY => {
                let (query, rest) = read_cstr(payload)?;
                expect_end(rest, "Query")?;
                Self::Query(query.to_string())
            }
            msg_type::PARSE => {
                let (name, rest) = read_cstr(payload)?;
                let (query, rest) = read_cstr(rest)?;
                let (count, mut rest) = read_i16(rest)?;
                let mut param_types = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    let (oid, remaining) = read_u32(rest)?;
                    param_types.push(oid);
                    rest = remaining;
                }
                expect_end(rest, "Parse")?;
                Self::Parse {
                    name: name.to_string(),
                    query: query.to_string(),
                    param_types,
                }
            }
            msg_type::BIND => decode_bind(payload)?,
            msg_type::DESCRIBE | msg_type::CLOSE => {
                let (target, rest) = read_u8(payload)?;
                let target = Target::from_byte(target).ok_or_else(|| {
                    Error::Protocol(format!("invalid Describe/Close target '{}'", target as char))
                })?;
                let (name, rest) = read_cstr(rest)?;
                expect_end(rest, "Describe/Close")?;
                let name = name.to_string();
                if type_byte == msg_type::DESCRIBE {
                    Self::Describe { target, name }
                } else {
                    Self::Close { target, name }
                }
            }
            msg_type::EXECUTE => {
                let (portal, rest) = read_cstr(payload)?;
                let (max_rows, rest) = read_u32(rest)?;
                expect_end(rest, "Execute")?;
                Self::Execute {
                    portal: portal.to_string(),
                    max_rows,
                }
            }
            msg_type::SYNC => {
                expect_end(payload, "Sync")?;
                Self::Sync
            }
            msg_type::FLUSH => {
                expect_end(payload, "Flush")?;
                Self::Flush
            }
            msg_type::TERMINATE => {
                expect_end(payload, "Terminate")?;
                Self::Terminate
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown frontend message type '{}'",
                    other as char
                )));
            }
        };
        Ok(msg)
    }

    /// Decode an untagged packet body (after its length word).
    pub fn decode_untagged(payload: &[u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        match code {
            startup::PROTOCOL_VERSION_3_0 => {
                let mut params = Vec::new();
                let mut data = rest;
                loop {
                    if data.first() == Some(&0) {
                        let (_, remaining) = read_u8(data)?;
                        expect_end(remaining, "StartupMessage")?;
                        break;
                    }
                    let (name, remaining) = read_cstr(data)?;
                    let (value, remaining) = read_cstr(remaining)?;
                    params.push((name.to_string(), value.to_string()));
                    data = remaining;
                }
                Ok(Self::Startup { params })
            }
            startup::CANCEL_REQUEST_CODE => {
                let (process_id, rest) = read_u32(rest)?;
                let (secret_key, rest) = read_u32(rest)?;
                expect_end(rest, "CancelRequest")?;
                Ok(Self::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            other => Err(Error::Unsupported(format!("untagged request code {other}"))),
        }
    }
}

fn decode_password(payload: &[u8]) -> FrontendMessage {
    if let Ok((mechanism, rest)) = read_cstr(payload)
        && let Ok((len, rest)) = read_i32(rest)
        && ((len == -1 && rest.is_empty()) || (len >= 0 && rest.len() == len as usize))
    {
        return FrontendMessage::SaslInitialResponse {
            mechanism: mechanism.to_string(),
            data: rest.to_vec(),
        };
    }
    if let Ok((password, rest)) = read_cstr(payload)
        && rest.is_empty()
    {
        return FrontendMessage::Password(password.to_string());
    }
    FrontendMessage::SaslResponse(payload.to_vec())
}

fn decode_bind(payload: &[u8]) -> Result<FrontendMessage> {
    let (portal, rest) = read_cstr(payload)?;
    let (statement, rest) = read_cstr(rest)?;

    let (format_count, rest) = read_i16(rest)?;
    let (_, rest) = read_bytes(rest, format_count.max(0) as usize * 2)?;

    let (param_count, mut rest) = read_i16(rest)?;
    let mut params = Vec::with_capacity(param_count.max(0) as usize);
    for _ in 0..param_count {
        let (len, remaining) = read_i32(rest)?;
        rest = remaining;
        if len < 0 {
            params.push(None);
        } else {
            let (value, remaining) = read_bytes(rest, len as usize)?;
            params.push(Some(value.to_vec()));
            rest = remaining;
        }
    }

    let (result_count, rest) = read_i16(rest)?;
    let (_, rest) = read_bytes(rest, result_count.max(0) as usize * 2)?;
    expect_end(rest, "Bind")?;

    Ok(FrontendMessage::Bind {
        portal: portal.to_string(),
        statement: statement.to_string(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(msg: &FrontendMessage) -> FrontendMessage {
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        FrontendMessage::decode(buf[0], &buf[5..]).unwrap()
    }

    #[test]
    fn query_frame() {
        let mut buf = Vec::new();
        write_query(&mut buf, "SELECT 1");

        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 13);
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }

    #[test]
    fn password_variants_are_distinguished() {
        let password = FrontendMessage::Password("md5abc".into());
        assert_eq!(reparse(&password), password);

        let initial = FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: b"n,,n=,r=abc".to_vec(),
        };
        assert_eq!(reparse(&initial), initial);

        let response = FrontendMessage::SaslResponse(b"c=biws,r=abc,p=xyz".to_vec());
        assert_eq!(reparse(&response), response);
    }

    #[test]
    fn bind_reparses() {
        let bind = FrontendMessage::Bind {
            portal: "p".into(),
            statement: "s".into(),
            params: vec![None, Some(b"x".to_vec())],
        };
        assert_eq!(reparse(&bind), bind);
    }

    #[test]
    fn every_tagged_message_round_trips() {
        let messages = vec![
            FrontendMessage::Password("md5598511ceaec347a656f032c7f2a16ef17".into()),
            FrontendMessage::SaslInitialResponse {
                mechanism: "SCRAM-SHA-256".into(),
                data: b"n,,n=,r=rOprNGfwEbeRWgbNEkqO".to_vec(),
            },
            FrontendMessage::SaslResponse(b"c=biws,r=rOprNGfwEbeRWgbNEkqO,p=dHzbZap".to_vec()),
            FrontendMessage::Query("SELECT 1; SELECT 2".into()),
            FrontendMessage::Parse {
                name: "statement_0".into(),
                query: "SELECT $1::int4, $2".into(),
                param_types: vec![23, 0],
            },
            FrontendMessage::Parse {
                name: String::new(),
                query: "SELECT 1".into(),
                param_types: Vec::new(),
            },
            FrontendMessage::Bind {
                portal: String::new(),
                statement: String::new(),
                params: Vec::new(),
            },
            FrontendMessage::Describe {
                target: Target::Statement,
                name: "statement_0".into(),
            },
            FrontendMessage::Describe {
                target: Target::Portal,
                name: String::new(),
            },
            FrontendMessage::Execute {
                portal: "cursor".into(),
                max_rows: 100,
            },
            FrontendMessage::Close {
                target: Target::Statement,
                name: "statement_0".into(),
            },
            FrontendMessage::Close {
                target: Target::Portal,
                name: "cursor".into(),
            },
            FrontendMessage::Sync,
            FrontendMessage::Flush,
            FrontendMessage::Terminate,
        ];

        for msg in messages {
            let mut buf = Vec::new();
            msg.encode(&mut buf);
            let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            assert_eq!(len + 1, buf.len(), "{} length word", msg.name());
            assert_eq!(reparse(&msg), msg, "{}", msg.name());
        }
    }

    #[test]
    fn cancel_request_reparses() {
        let cancel = FrontendMessage::CancelRequest {
            process_id: 4242,
            secret_key: 0x0bad_cafe,
        };
        let mut buf = Vec::new();
        cancel.encode(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(FrontendMessage::decode_untagged(&buf[4..]).unwrap(), cancel);
    }

    #[test]
    fn startup_reparses() {
        let startup = FrontendMessage::Startup {
            params: vec![("user".into(), "alice".into())],
        };
        let mut buf = Vec::new();
        startup.encode(&mut buf);
        assert_eq!(FrontendMessage::decode_untagged(&buf[4..]).unwrap(), startup);
    }
}
