//! The binary codec's two core operations: `encode` and `decode`, plus the
//! primitive impls (integers, floats, strings, arrays) every higher-level
//! type builds on.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::context::Context;
use crate::error::{Error, EncodingResult};

/// Anything that can serialize itself to the OPC UA binary wire format.
pub trait BinaryEncodable {
    /// Write `self` to `stream` using little-endian primitives.
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()>;

    /// The exact number of bytes [`Self::encode`] will write. Implementors
    /// that can't cheaply size themselves may compute this by encoding into
    /// a scratch buffer; callers should not assume this is free.
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let mut buf = Vec::new();
        // A type whose encode is infallible against a Vec<u8> sink never hits
        // the Io branch; treat any other failure as a logic bug during sizing.
        self.encode(&mut buf, ctx)
            .expect("byte_len: encode into Vec<u8> must not fail");
        buf.len()
    }
}

/// Anything that can deserialize itself from the OPC UA binary wire format.
pub trait BinaryDecodable: Sized {
    /// Read one value of `Self` from `stream`.
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self>;
}

/// Deep-copy a value through the codec: encode then decode through an
/// in-memory buffer. Used when copying an [`crate::extension_object::ExtensionObject`]
/// whose body is already materialized, per the invariant that copying must
/// round-trip through the codec rather than shallow-cloning the pointer.
pub fn deep_copy<T: BinaryEncodable + BinaryDecodable>(value: &T) -> EncodingResult<T> {
    let ctx = Context::none();
    let mut buf = Vec::new();
    value.encode(&mut buf, &ctx)?;
    let mut cursor = std::io::Cursor::new(buf);
    T::decode(&mut cursor, &ctx)
}

macro_rules! impl_primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl BinaryEncodable for $ty {
            fn encode(&self, stream: &mut dyn Write, _ctx: &Context<'_>) -> EncodingResult<()> {
                stream.$write::<LittleEndian>(*self).map_err(Error::from)
            }
            fn byte_len(&self, _ctx: &Context<'_>) -> usize {
                std::mem::size_of::<$ty>()
            }
        }
        impl BinaryDecodable for $ty {
            fn decode(stream: &mut dyn Read, _ctx: &Context<'_>) -> EncodingResult<Self> {
                stream.$read::<LittleEndian>().map_err(Error::from)
            }
        }
    };
}

impl_primitive!(u16, write_u16, read_u16);
impl_primitive!(i16, write_i16, read_i16);
impl_primitive!(u32, write_u32, read_u32);
impl_primitive!(i32, write_i32, read_i32);
impl_primitive!(u64, write_u64, read_u64);
impl_primitive!(i64, write_i64, read_i64);
impl_primitive!(f32, write_f32, read_f32);
impl_primitive!(f64, write_f64, read_f64);

impl BinaryEncodable for u8 {
    fn encode(&self, stream: &mut dyn Write, _ctx: &Context<'_>) -> EncodingResult<()> {
        stream.write_u8(*self).map_err(Error::from)
    }
    fn byte_len(&self, _ctx: &Context<'_>) -> usize {
        1
    }
}
impl BinaryDecodable for u8 {
    fn decode(stream: &mut dyn Read, _ctx: &Context<'_>) -> EncodingResult<Self> {
        stream.read_u8().map_err(Error::from)
    }
}

impl BinaryEncodable for bool {
    fn encode(&self, stream: &mut dyn Write, _ctx: &Context<'_>) -> EncodingResult<()> {
        stream.write_u8(*self as u8).map_err(Error::from)
    }
    fn byte_len(&self, _ctx: &Context<'_>) -> usize {
        1
    }
}
impl BinaryDecodable for bool {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(u8::decode(stream, ctx)? != 0)
    }
}

/// Write a length-prefixed UTF-8 string. `None` encodes as length `-1`.
pub fn write_string(stream: &mut dyn Write, value: Option<&str>) -> EncodingResult<()> {
    match value {
        None => stream.write_i32::<LittleEndian>(-1).map_err(Error::from),
        Some(s) => {
            let bytes = s.as_bytes();
            stream
                .write_i32::<LittleEndian>(bytes.len() as i32)
                .map_err(Error::from)?;
            stream.write_all(bytes).map_err(Error::from)
        }
    }
}

/// Read a length-prefixed UTF-8 string. Length `-1` decodes as `None`.
pub fn read_string(stream: &mut dyn Read, max_len: usize) -> EncodingResult<Option<String>> {
    let len = stream.read_i32::<LittleEndian>().map_err(Error::from)?;
    if len < -1 {
        return Err(Error::InvalidLength(len, "string"));
    }
    if len == -1 {
        return Ok(None);
    }
    if max_len != 0 && len as usize > max_len {
        return Err(Error::InvalidLength(len, "string"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).map_err(Error::from)?;
    String::from_utf8(buf).map(Some).map_err(|_| Error::InvalidUtf8)
}

/// Write a length-prefixed byte string. `None` encodes as length `-1`.
pub fn write_byte_string(stream: &mut dyn Write, value: Option<&[u8]>) -> EncodingResult<()> {
    match value {
        None => stream.write_i32::<LittleEndian>(-1).map_err(Error::from),
        Some(bytes) => {
            stream
                .write_i32::<LittleEndian>(bytes.len() as i32)
                .map_err(Error::from)?;
            stream.write_all(bytes).map_err(Error::from)
        }
    }
}

/// Read a length-prefixed byte string. Length `-1` decodes as `None`.
pub fn read_byte_string(stream: &mut dyn Read, max_len: usize) -> EncodingResult<Option<Vec<u8>>> {
    let len = stream.read_i32::<LittleEndian>().map_err(Error::from)?;
    if len < -1 {
        return Err(Error::InvalidLength(len, "byte string"));
    }
    if len == -1 {
        return Ok(None);
    }
    if max_len != 0 && len as usize > max_len {
        return Err(Error::InvalidLength(len, "byte string"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).map_err(Error::from)?;
    Ok(Some(buf))
}

/// Write an array as `i32 count` followed by each encoded element. `None`
/// encodes as count `-1`.
pub fn write_array<T: BinaryEncodable>(
    stream: &mut dyn Write,
    ctx: &Context<'_>,
    value: &Option<Vec<T>>,
) -> EncodingResult<()> {
    match value {
        None => stream.write_i32::<LittleEndian>(-1).map_err(Error::from),
        Some(items) => {
            stream
                .write_i32::<LittleEndian>(items.len() as i32)
                .map_err(Error::from)?;
            for item in items {
                item.encode(stream, ctx)?;
            }
            Ok(())
        }
    }
}

/// Read an array as `i32 count` followed by each decoded element. Count
/// `-1` decodes as `None`.
pub fn read_array<T: BinaryDecodable>(
    stream: &mut dyn Read,
    ctx: &Context<'_>,
    max_len: usize,
) -> EncodingResult<Option<Vec<T>>> {
    let len = stream.read_i32::<LittleEndian>().map_err(Error::from)?;
    if len < -1 {
        return Err(Error::InvalidLength(len, "array"));
    }
    if len == -1 {
        return Ok(None);
    }
    if max_len != 0 && len as usize > max_len {
        return Err(Error::InvalidLength(len, "array"));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(T::decode(stream, ctx)?);
    }
    Ok(Some(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scalars() {
        let ctx = Context::none();
        for v in [0u32, 1, u32::MAX] {
            let mut buf = Vec::new();
            v.encode(&mut buf, &ctx).unwrap();
            let mut cur = std::io::Cursor::new(buf);
            assert_eq!(u32::decode(&mut cur, &ctx).unwrap(), v);
        }
    }

    #[test]
    fn null_string_round_trips() {
        let mut buf = Vec::new();
        write_string(&mut buf, None).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(read_string(&mut cur, 0).unwrap(), None);
    }

    #[test]
    fn string_round_trips() {
        let mut buf = Vec::new();
        write_string(&mut buf, Some("hello")).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(read_string(&mut cur, 0).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn array_round_trips() {
        let ctx = Context::none();
        let mut buf = Vec::new();
        write_array(&mut buf, &ctx, &Some(vec![1u32, 2, 3])).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(
            read_array::<u32>(&mut cur, &ctx, 0).unwrap(),
            Some(vec![1, 2, 3])
        );
    }
}
