//! [`Variant`], the tagged-union scalar/array value carried by [`crate::data_value::DataValue`]
//! and event field lists.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::basic_types::{LocalizedText, QualifiedName};
use crate::context::Context;
use crate::encoding::{read_byte_string, read_string, write_byte_string, write_string, BinaryDecodable, BinaryEncodable};
use crate::error::{Error, EncodingResult};
use crate::node_id::NodeId;
use crate::status_code::StatusCode;

/// A dynamically-typed OPC UA value. Built-in scalars plus a homogeneous
/// array form; the array form is used by data change notifications whose
/// monitored attribute is itself array-valued, and by event field lists.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// No value.
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    DateTime(chrono::DateTime<chrono::Utc>),
    Guid(Uuid),
    ByteString(Option<Vec<u8>>),
    NodeId(Box<NodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    /// A homogeneous array of scalar variants (never nested arrays).
    Array(Vec<Variant>),
}

#[allow(missing_docs)]
impl Variant {
    fn type_id(&self) -> u8 {
        match self {
            Variant::Empty => 0,
            Variant::Boolean(_) => 1,
            Variant::SByte(_) => 2,
            Variant::Byte(_) => 3,
            Variant::Int16(_) => 4,
            Variant::UInt16(_) => 5,
            Variant::Int32(_) => 6,
            Variant::UInt32(_) => 7,
            Variant::Int64(_) => 8,
            Variant::UInt64(_) => 9,
            Variant::Float(_) => 10,
            Variant::Double(_) => 11,
            Variant::String(_) => 12,
            Variant::DateTime(_) => 13,
            Variant::Guid(_) => 14,
            Variant::ByteString(_) => 15,
            Variant::NodeId(_) => 17,
            Variant::StatusCode(_) => 19,
            Variant::QualifiedName(_) => 20,
            Variant::LocalizedText(_) => 21,
            Variant::Array(_) => 0, // overwritten with element type | ARRAY_MASK below
        }
    }
}

const ARRAY_MASK: u8 = 0x80;

impl BinaryEncodable for Variant {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        if let Variant::Array(items) = self {
            let elem_type = items.first().map(|v| v.type_id()).unwrap_or(0);
            stream.write_u8(elem_type | ARRAY_MASK).map_err(Error::from)?;
            stream
                .write_i32::<LittleEndian>(items.len() as i32)
                .map_err(Error::from)?;
            for item in items {
                item.encode_value(stream, ctx)?;
            }
            return Ok(());
        }
        stream.write_u8(self.type_id()).map_err(Error::from)?;
        self.encode_value(stream, ctx)
    }
}

impl Variant {
    fn encode_value(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        match self {
            Variant::Empty => Ok(()),
            Variant::Boolean(v) => v.encode(stream, ctx),
            Variant::SByte(v) => stream.write_i8(*v).map_err(Error::from),
            Variant::Byte(v) => v.encode(stream, ctx),
            Variant::Int16(v) => v.encode(stream, ctx),
            Variant::UInt16(v) => v.encode(stream, ctx),
            Variant::Int32(v) => v.encode(stream, ctx),
            Variant::UInt32(v) => v.encode(stream, ctx),
            Variant::Int64(v) => v.encode(stream, ctx),
            Variant::UInt64(v) => v.encode(stream, ctx),
            Variant::Float(v) => v.encode(stream, ctx),
            Variant::Double(v) => v.encode(stream, ctx),
            Variant::String(v) => write_string(stream, v.as_deref()),
            Variant::DateTime(v) => {
                let ticks = datetime_to_ticks(*v);
                ticks.encode(stream, ctx)
            }
            Variant::Guid(v) => stream.write_all(v.as_bytes()).map_err(Error::from),
            Variant::ByteString(v) => write_byte_string(stream, v.as_deref()),
            Variant::NodeId(v) => v.encode(stream, ctx),
            Variant::StatusCode(v) => v.0.encode(stream, ctx),
            Variant::QualifiedName(v) => v.encode(stream, ctx),
            Variant::LocalizedText(v) => v.encode(stream, ctx),
            Variant::Array(_) => unreachable!("arrays are encoded in encode(), not encode_value()"),
        }
    }
}

impl BinaryDecodable for Variant {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let tag = stream.read_u8().map_err(Error::from)?;
        let is_array = tag & ARRAY_MASK != 0;
        let elem_type = tag & !ARRAY_MASK;
        if is_array {
            let len = stream.read_i32::<LittleEndian>().map_err(Error::from)?;
            if len < -1 {
                return Err(Error::InvalidLength(len, "variant array"));
            }
            let mut items = Vec::with_capacity(len.max(0) as usize);
            for _ in 0..len.max(0) {
                items.push(Variant::decode_value(elem_type, stream, ctx)?);
            }
            return Ok(Variant::Array(items));
        }
        Variant::decode_value(elem_type, stream, ctx)
    }
}

impl Variant {
    fn decode_value(type_id: u8, stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(match type_id {
            0 => Variant::Empty,
            1 => Variant::Boolean(bool::decode(stream, ctx)?),
            2 => Variant::SByte(stream.read_i8().map_err(Error::from)?),
            3 => Variant::Byte(u8::decode(stream, ctx)?),
            4 => Variant::Int16(i16::decode(stream, ctx)?),
            5 => Variant::UInt16(u16::decode(stream, ctx)?),
            6 => Variant::Int32(i32::decode(stream, ctx)?),
            7 => Variant::UInt32(u32::decode(stream, ctx)?),
            8 => Variant::Int64(i64::decode(stream, ctx)?),
            9 => Variant::UInt64(u64::decode(stream, ctx)?),
            10 => Variant::Float(f32::decode(stream, ctx)?),
            11 => Variant::Double(f64::decode(stream, ctx)?),
            12 => Variant::String(read_string(stream, 0)?),
            13 => Variant::DateTime(ticks_to_datetime(i64::decode(stream, ctx)?)),
            14 => {
                let mut bytes = [0u8; 16];
                stream.read_exact(&mut bytes).map_err(Error::from)?;
                Variant::Guid(Uuid::from_bytes(bytes))
            }
            15 => Variant::ByteString(read_byte_string(stream, 0)?),
            17 => Variant::NodeId(Box::new(NodeId::decode(stream, ctx)?)),
            19 => Variant::StatusCode(StatusCode(u32::decode(stream, ctx)?)),
            20 => Variant::QualifiedName(Box::new(QualifiedName::decode(stream, ctx)?)),
            21 => Variant::LocalizedText(Box::new(LocalizedText::decode(stream, ctx)?)),
            other => return Err(Error::InvalidLength(other as i32, "variant type id")),
        })
    }
}

/// OPC UA `DateTime` ticks: 100ns intervals since 1601-01-01.
pub(crate) fn datetime_to_ticks(dt: chrono::DateTime<chrono::Utc>) -> i64 {
    const EPOCH_OFFSET_100NS: i64 = 116_444_736_000_000_000;
    dt.timestamp_nanos_opt().unwrap_or(0) / 100 + EPOCH_OFFSET_100NS
}

pub(crate) fn ticks_to_datetime(ticks: i64) -> chrono::DateTime<chrono::Utc> {
    const EPOCH_OFFSET_100NS: i64 = 116_444_736_000_000_000;
    let unix_100ns = ticks - EPOCH_OFFSET_100NS;
    chrono::DateTime::from_timestamp(unix_100ns / 10_000_000, ((unix_100ns % 10_000_000) * 100) as u32)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from(std::time::UNIX_EPOCH))
}

pub(crate) fn encode_timestamp(
    dt: chrono::DateTime<chrono::Utc>,
    stream: &mut dyn Write,
    ctx: &Context<'_>,
) -> EncodingResult<()> {
    datetime_to_ticks(dt).encode(stream, ctx)
}

pub(crate) fn decode_timestamp(
    stream: &mut dyn Read,
    ctx: &Context<'_>,
) -> EncodingResult<chrono::DateTime<chrono::Utc>> {
    Ok(ticks_to_datetime(i64::decode(stream, ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Variant) {
        let ctx = Context::none();
        let mut buf = Vec::new();
        v.encode(&mut buf, &ctx).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(Variant::decode(&mut cur, &ctx).unwrap(), v);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Variant::Empty);
        round_trip(Variant::Boolean(true));
        round_trip(Variant::Int32(-42));
        round_trip(Variant::UInt32(42));
        round_trip(Variant::Double(3.25));
        round_trip(Variant::String(Some("hi".into())));
        round_trip(Variant::String(None));
        round_trip(Variant::NodeId(Box::new(NodeId::new(1, 7))));
        round_trip(Variant::StatusCode(StatusCode::BadTimeout));
    }

    #[test]
    fn array_round_trips() {
        round_trip(Variant::Array(vec![
            Variant::Int32(1),
            Variant::Int32(2),
            Variant::Int32(3),
        ]));
    }
}
