//! Authentication, session and asynchronous backend messages.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{MessageBuilder, expect_end, read_bytes, read_cstr, read_i32, read_u8, read_u32};
use crate::protocol::types::{TransactionStatus, U32BE};

use super::msg_type;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication message from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Authentication successful
    Ok,
    /// Kerberos V5 authentication required
    KerberosV5,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// GSS authentication
    Gss,
    /// GSS continue (with additional data)
    GssContinue(Vec<u8>),
    /// SSPI authentication
    Sspi,
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<String> },
    /// SASL continue (with server-first-message)
    SaslContinue(Vec<u8>),
    /// SASL final (with server-final-message)
    SaslFinal(Vec<u8>),
}

impl Authentication {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (auth_type, rest) = read_i32(payload)?;

        let auth = match auth_type {
            auth_type::OK => Authentication::Ok,
            auth_type::KERBEROS_V5 => Authentication::KerberosV5,
            auth_type::CLEARTEXT_PASSWORD => Authentication::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let (salt_bytes, remaining) = read_bytes(rest, 4)?;
                expect_end(remaining, "AuthenticationMD5Password")?;
                let mut salt = [0u8; 4];
                salt.copy_from_slice(salt_bytes);
                return Ok(Authentication::Md5Password { salt });
            }
            auth_type::GSS => Authentication::Gss,
            auth_type::GSS_CONTINUE => return Ok(Authentication::GssContinue(rest.to_vec())),
            auth_type::SSPI => Authentication::Sspi,
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                loop {
                    if data.first() == Some(&0) {
                        let (_, remaining) = read_u8(data)?;
                        expect_end(remaining, "AuthenticationSASL")?;
                        break;
                    }
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism.to_string());
                    data = remaining;
                }
                return Ok(Authentication::Sasl { mechanisms });
            }
            auth_type::SASL_CONTINUE => return Ok(Authentication::SaslContinue(rest.to_vec())),
            auth_type::SASL_FINAL => return Ok(Authentication::SaslFinal(rest.to_vec())),
            _ => {
                return Err(Error::Protocol(format!(
                    "Unknown authentication type: {}",
                    auth_type
                )));
            }
        };
        expect_end(rest, "Authentication")?;
        Ok(auth)
    }

    /// Encode as a complete `R` frame.
    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::AUTHENTICATION);
        match self {
            Authentication::Ok => msg.write_i32(auth_type::OK),
            Authentication::KerberosV5 => msg.write_i32(auth_type::KERBEROS_V5),
            Authentication::CleartextPassword => msg.write_i32(auth_type::CLEARTEXT_PASSWORD),
            Authentication::Md5Password { salt } => {
                msg.write_i32(auth_type::MD5_PASSWORD);
                msg.write_bytes(salt);
            }
            Authentication::Gss => msg.write_i32(auth_type::GSS),
            Authentication::GssContinue(data) => {
                msg.write_i32(auth_type::GSS_CONTINUE);
                msg.write_bytes(data);
            }
            Authentication::Sspi => msg.write_i32(auth_type::SSPI),
            Authentication::Sasl { mechanisms } => {
                msg.write_i32(auth_type::SASL);
                for mechanism in mechanisms {
                    msg.write_cstr(mechanism);
                }
                msg.write_u8(0);
            }
            Authentication::SaslContinue(data) => {
                msg.write_i32(auth_type::SASL_CONTINUE);
                msg.write_bytes(data);
            }
            Authentication::SaslFinal(data) => {
                msg.write_i32(auth_type::SASL_FINAL);
                msg.write_bytes(data);
            }
        }
        msg.finish();
    }
}

/// BackendKeyData message - contains process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: U32BE,
    /// Secret key for cancellation
    pub secret_key: U32BE,
}

impl BackendKeyData {
    /// Build from native values.
    pub fn new(process_id: u32, secret_key: u32) -> Self {
        Self {
            pid: U32BE::new(process_id),
            secret_key: U32BE::new(secret_key),
        }
    }

    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Self::read_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    /// Get the process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Get the secret key.
    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::BACKEND_KEY_DATA);
        msg.write_bytes(self.as_bytes());
        msg.finish();
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: String,
}

impl ParameterStatus {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, rest) = read_cstr(rest)?;
        expect_end(rest, "ParameterStatus")?;
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::PARAMETER_STATUS);
        msg.write_cstr(&self.name);
        msg.write_cstr(&self.value);
        msg.finish();
    }
}

/// ReadyForQuery message - parse the transaction status byte.
pub fn parse_ready_for_query(payload: &[u8]) -> Result<TransactionStatus> {
    let (status, rest) = read_u8(payload)?;
    expect_end(rest, "ReadyForQuery")?;
    TransactionStatus::from_byte(status).ok_or_else(|| {
        Error::Protocol(format!(
            "ReadyForQuery: invalid transaction status '{}'",
            status as char
        ))
    })
}

/// Encode a ReadyForQuery frame.
pub fn write_ready_for_query(buf: &mut Vec<u8>, status: TransactionStatus) {
    let mut msg = MessageBuilder::new(buf, msg_type::READY_FOR_QUERY);
    msg.write_u8(status.as_byte());
    msg.finish();
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    /// PID of the notifying backend
    pub process_id: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

impl NotificationResponse {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (process_id, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, rest) = read_cstr(rest)?;
        expect_end(rest, "NotificationResponse")?;
        Ok(Self {
            process_id,
            channel: channel.to_string(),
            payload: payload_str.to_string(),
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::NOTIFICATION_RESPONSE);
        msg.write_u32(self.process_id);
        msg.write_cstr(&self.channel);
        msg.write_cstr(&self.payload);
        msg.finish();
    }
}

/// NegotiateProtocolVersion message - server doesn't support requested protocol features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported
    pub newest_minor_version: u32,
    /// Unrecognized protocol options
    pub unrecognized_options: Vec<String>,
}

impl NegotiateProtocolVersion {
    /// Parse a NegotiateProtocolVersion message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (num_options, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::new();
        for _ in 0..num_options {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option.to_string());
            rest = remaining;
        }
        expect_end(rest, "NegotiateProtocolVersion")?;

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::NEGOTIATE_PROTOCOL_VERSION);
        msg.write_u32(self.newest_minor_version);
        msg.write_u32(self.unrecognized_options.len() as u32);
        for option in &self.unrecognized_options {
            msg.write_cstr(option);
        }
        msg.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_request_carries_salt() {
        let auth = Authentication::parse(&[0, 0, 0, 5, 1, 2, 3, 4]).unwrap();
        assert_eq!(auth, Authentication::Md5Password { salt: [1, 2, 3, 4] });
    }

    #[test]
    fn md5_request_without_salt_is_rejected() {
        assert!(Authentication::parse(&[0, 0, 0, 5, 1, 2]).is_err());
    }

    #[test]
    fn sasl_mechanism_list() {
        let auth = Authentication::parse(b"\x00\x00\x00\x0aSCRAM-SHA-256\x00\x00").unwrap();
        assert_eq!(
            auth,
            Authentication::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into()]
            }
        );
    }

    #[test]
    fn backend_key_data_needs_exactly_eight_bytes() {
        let key = BackendKeyData::parse(&[0, 0, 0, 42, 0, 0, 1, 0]).unwrap();
        assert_eq!(key.process_id(), 42);
        assert_eq!(key.secret(), 256);
        assert!(BackendKeyData::parse(&[0, 0, 0, 42]).is_err());
        assert!(BackendKeyData::parse(&[0; 9]).is_err());
    }

    #[test]
    fn ready_for_query_status() {
        assert_eq!(parse_ready_for_query(b"T").unwrap(), TransactionStatus::InTransaction);
        assert!(parse_ready_for_query(b"X").is_err());
        assert!(parse_ready_for_query(b"").is_err());
    }
}
