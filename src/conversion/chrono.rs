//! Chrono crate type implementations (NaiveDate, NaiveTime, NaiveDateTime, DateTime).

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::value::Value;

use super::{FromWireValue, ToWireValue, text};

fn check(oid: Oid, expected: Oid, rust_type: &str) -> Result<()> {
    if oid != expected {
        return Err(Error::Decode(format!(
            "cannot decode oid {} as {}",
            oid, rust_type
        )));
    }
    Ok(())
}

fn invalid(kind: &str, e: chrono::ParseError) -> Error {
    Error::Decode(format!("invalid {}: {}", kind, e))
}

impl FromWireValue<'_> for NaiveDate {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check(oid, oid::DATE, "NaiveDate")?;
        NaiveDate::parse_from_str(text(bytes)?, "%Y-%m-%d").map_err(|e| invalid("date", e))
    }
}

impl ToWireValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl FromWireValue<'_> for NaiveTime {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check(oid, oid::TIME, "NaiveTime")?;
        NaiveTime::parse_from_str(text(bytes)?, "%H:%M:%S%.f").map_err(|e| invalid("time", e))
    }
}

impl ToWireValue for NaiveTime {
    fn to_value(&self) -> Value {
        Value::Time(*self)
    }
}

impl FromWireValue<'_> for NaiveDateTime {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check(oid, oid::TIMESTAMP, "NaiveDateTime")?;
        NaiveDateTime::parse_from_str(text(bytes)?, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| invalid("timestamp", e))
    }
}

impl ToWireValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

impl FromWireValue<'_> for DateTime<FixedOffset> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        check(oid, oid::TIMESTAMPTZ, "DateTime<FixedOffset>")?;
        DateTime::parse_from_str(text(bytes)?, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map_err(|e| invalid("timestamptz", e))
    }
}

impl ToWireValue for DateTime<FixedOffset> {
    fn to_value(&self) -> Value {
        Value::TimestampTz(*self)
    }
}

impl FromWireValue<'_> for DateTime<Utc> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        DateTime::<FixedOffset>::from_text(oid, bytes).map(|ts| ts.with_timezone(&Utc))
    }
}

impl ToWireValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::TimestampTz(self.fixed_offset())
    }
}
