//! [`DataValue`]: a value plus status and timestamp metadata.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::encoding::{BinaryDecodable, BinaryEncodable};
use crate::error::{Error, EncodingResult};
use crate::status_code::StatusCode;
use crate::variant::Variant;

const HAS_VALUE: u8 = 0x01;
const HAS_STATUS: u8 = 0x02;
const HAS_SOURCE_TIMESTAMP: u8 = 0x04;
const HAS_SERVER_TIMESTAMP: u8 = 0x08;
const HAS_SOURCE_PICOSECONDS: u8 = 0x10;
const HAS_SERVER_PICOSECONDS: u8 = 0x20;

/// A value plus status code, source timestamp (UTC, 100ns resolution), server
/// timestamp, and picosecond sub-precision fields. A `DataValue` with `Bad`
/// status still carries a meaningful `value` only if the producing handler
/// chose to set one -- the codec does not enforce this.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value, if any.
    pub value: Option<Variant>,
    /// Status of the value.
    pub status: Option<StatusCode>,
    /// When the value was produced at the source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Sub-100ns precision for `source_timestamp`, in picoseconds (0..=9999).
    pub source_picoseconds: Option<u16>,
    /// When the server received/stamped the value.
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Sub-100ns precision for `server_timestamp`, in picoseconds (0..=9999).
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// Construct a `Good` data value with only a source timestamp of now.
    pub fn new_now(value: Variant) -> Self {
        Self {
            value: Some(value),
            status: Some(StatusCode::Good),
            source_timestamp: Some(Utc::now()),
            source_picoseconds: None,
            server_timestamp: Some(Utc::now()),
            server_picoseconds: None,
        }
    }

    /// Construct a data value carrying only a bad status code, no value.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: None,
            status: Some(status),
            source_timestamp: None,
            source_picoseconds: None,
            server_timestamp: None,
            server_picoseconds: None,
        }
    }
}

fn encoding_mask(v: &DataValue) -> u8 {
    let mut mask = 0u8;
    if v.value.is_some() {
        mask |= HAS_VALUE;
    }
    if v.status.is_some() {
        mask |= HAS_STATUS;
    }
    if v.source_timestamp.is_some() {
        mask |= HAS_SOURCE_TIMESTAMP;
    }
    if v.source_picoseconds.is_some() {
        mask |= HAS_SOURCE_PICOSECONDS;
    }
    if v.server_timestamp.is_some() {
        mask |= HAS_SERVER_TIMESTAMP;
    }
    if v.server_picoseconds.is_some() {
        mask |= HAS_SERVER_PICOSECONDS;
    }
    mask
}

fn datetime_to_ticks(dt: DateTime<Utc>) -> i64 {
    const EPOCH_OFFSET_100NS: i64 = 116_444_736_000_000_000;
    dt.timestamp_nanos_opt().unwrap_or(0) / 100 + EPOCH_OFFSET_100NS
}

fn ticks_to_datetime(ticks: i64) -> DateTime<Utc> {
    const EPOCH_OFFSET_100NS: i64 = 116_444_736_000_000_000;
    let unix_100ns = ticks - EPOCH_OFFSET_100NS;
    DateTime::from_timestamp(unix_100ns / 10_000_000, ((unix_100ns % 10_000_000) * 100) as u32)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

impl BinaryEncodable for DataValue {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        stream.write_u8(encoding_mask(self)).map_err(Error::from)?;
        if let Some(value) = &self.value {
            value.encode(stream, ctx)?;
        }
        if let Some(status) = &self.status {
            status.0.encode(stream, ctx)?;
        }
        if let Some(ts) = &self.source_timestamp {
            datetime_to_ticks(*ts).encode(stream, ctx)?;
        }
        if let Some(ps) = &self.source_picoseconds {
            ps.encode(stream, ctx)?;
        }
        if let Some(ts) = &self.server_timestamp {
            datetime_to_ticks(*ts).encode(stream, ctx)?;
        }
        if let Some(ps) = &self.server_picoseconds {
            ps.encode(stream, ctx)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for DataValue {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let mask = stream.read_u8().map_err(Error::from)?;
        let value = if mask & HAS_VALUE != 0 {
            Some(Variant::decode(stream, ctx)?)
        } else {
            None
        };
        let status = if mask & HAS_STATUS != 0 {
            Some(StatusCode(u32::decode(stream, ctx)?))
        } else {
            None
        };
        let source_timestamp = if mask & HAS_SOURCE_TIMESTAMP != 0 {
            Some(ticks_to_datetime(i64::decode(stream, ctx)?))
        } else {
            None
        };
        let source_picoseconds = if mask & HAS_SOURCE_PICOSECONDS != 0 {
            Some(u16::decode(stream, ctx)?)
        } else {
            None
        };
        let server_timestamp = if mask & HAS_SERVER_TIMESTAMP != 0 {
            Some(ticks_to_datetime(i64::decode(stream, ctx)?))
        } else {
            None
        };
        let server_picoseconds = if mask & HAS_SERVER_PICOSECONDS != 0 {
            Some(u16::decode(stream, ctx)?)
        } else {
            None
        };
        Ok(DataValue {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_only_value_and_status() {
        let ctx = Context::none();
        let dv = DataValue {
            value: Some(Variant::Int32(5)),
            status: Some(StatusCode::Good),
            source_timestamp: None,
            source_picoseconds: None,
            server_timestamp: None,
            server_picoseconds: None,
        };
        let mut buf = Vec::new();
        dv.encode(&mut buf, &ctx).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(DataValue::decode(&mut cur, &ctx).unwrap(), dv);
    }

    #[test]
    fn bad_status_can_carry_no_value() {
        let dv = DataValue::bad(StatusCode::BadTimeout);
        assert!(dv.value.is_none());
        assert_eq!(dv.status, Some(StatusCode::BadTimeout));
    }
}
