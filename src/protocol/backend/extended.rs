//! Extended query protocol backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{MessageBuilder, expect_end, read_i16, read_u32};
use crate::protocol::types::Oid;

use super::msg_type;

/// ParameterDescription message - describes parameters for a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterDescription {
    /// Parameter type OIDs
    pub param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_params, mut data) = read_i16(payload)?;
        if num_params < 0 {
            return Err(Error::Protocol(format!(
                "ParameterDescription: negative parameter count {num_params}"
            )));
        }

        let mut param_oids = Vec::with_capacity(num_params as usize);
        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }
        expect_end(data, "ParameterDescription")?;

        Ok(Self { param_oids })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, msg_type::PARAMETER_DESCRIPTION);
        msg.write_i16(self.param_oids.len() as i16);
        for &oid in &self.param_oids {
            msg.write_u32(oid);
        }
        msg.finish();
    }

    /// Get parameter type OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }
}

/// Encode a message whose body is empty (ParseComplete, NoData, ...).
pub fn write_empty(buf: &mut Vec<u8>, type_byte: u8) {
    let msg = MessageBuilder::new(buf, type_byte);
    msg.finish();
}

/// Check that a marker message arrived with an empty body.
pub fn parse_empty(payload: &[u8], name: &str) -> Result<()> {
    expect_end(payload, name)
}
