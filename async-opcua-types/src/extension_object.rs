//! Extension objects: the OPC UA container for "any typed value", used to
//! carry notification payloads (`DataChangeNotification`,
//! `EventNotificationList`, `StatusChangeNotification`) and monitoring
//! filters.
//!
//! A body is one of three cases: none, a lazy binary body (bytes + type
//! id, decoded on demand via `decode_inner::<T>()`), or an already-decoded
//! body (pointer + type descriptor, via the `DynEncodable` trait). XML
//! element bodies exist on the wire but are always rejected at decode.

use std::any::Any;
use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::context::Context;
use crate::encoding::{deep_copy, read_byte_string, write_byte_string, BinaryDecodable, BinaryEncodable};
use crate::error::{Error, EncodingResult};
use crate::node_id::NodeId;

/// A type that can live inside the `Decoded` case of an [`ExtensionObject`]:
/// a concrete, codec-round-trippable message body tagged with a stable
/// binary type id.
pub trait ExtensionObjectBody:
    BinaryEncodable + BinaryDecodable + Clone + fmt::Debug + Send + Sync + 'static
{
    /// The node id identifying this type's binary encoding on the wire.
    fn type_id() -> NodeId;
}

/// Type-erased handle to an [`ExtensionObjectBody`], allowing an already
/// materialized extension object body to be stored and re-encoded without
/// the holder knowing its concrete type.
pub trait DynEncodable: fmt::Debug + Send + Sync {
    /// Access the concrete value for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Encode the concrete value's body bytes (without the extension object
    /// envelope).
    fn dyn_encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()>;
    /// Round-trip this value through its own codec, producing a fresh,
    /// independently-owned copy. Used by [`ExtensionObject::deep_copy`]
    /// instead of a shallow pointer clone.
    fn dyn_round_trip_clone(&self, ctx: &Context<'_>) -> EncodingResult<Box<dyn DynEncodable>>;
}

impl<T: ExtensionObjectBody> DynEncodable for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.encode(stream, ctx)
    }

    fn dyn_round_trip_clone(&self, ctx: &Context<'_>) -> EncodingResult<Box<dyn DynEncodable>> {
        let copy: T = deep_copy(self)?;
        let _ = ctx;
        Ok(Box::new(copy))
    }
}

/// The body of an [`ExtensionObject`].
pub enum ExtensionObjectEncoding {
    /// No body.
    None,
    /// A lazily-decodable binary body: the raw bytes as received on the
    /// wire, decoded on demand via [`ExtensionObject::decode_inner`].
    ByteString(Vec<u8>),
    /// An already-materialized, type-erased body.
    Decoded(Box<dyn DynEncodable>),
}

impl fmt::Debug for ExtensionObjectEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionObjectEncoding::None => write!(f, "None"),
            ExtensionObjectEncoding::ByteString(b) => {
                write!(f, "ByteString({} bytes)", b.len())
            }
            ExtensionObjectEncoding::Decoded(v) => write!(f, "Decoded({:?})", v),
        }
    }
}

/// An extension object: a type id plus one of three body representations.
/// See module docs.
#[derive(Debug)]
pub struct ExtensionObject {
    /// The binary type id of the body, or [`NodeId::null`] when the body is
    /// [`ExtensionObjectEncoding::None`].
    pub node_id: NodeId,
    /// The body.
    pub body: ExtensionObjectEncoding,
}

impl ExtensionObject {
    /// The null extension object (no body).
    pub fn null() -> Self {
        Self {
            node_id: NodeId::null(),
            body: ExtensionObjectEncoding::None,
        }
    }

    /// Wrap an already-constructed message as a `Decoded` extension object.
    pub fn from_message<T: ExtensionObjectBody>(value: T) -> Self {
        Self {
            node_id: T::type_id(),
            body: ExtensionObjectEncoding::Decoded(Box::new(value)),
        }
    }

    /// Whether this extension object's declared type matches `T`.
    pub fn inner_is<T: ExtensionObjectBody>(&self) -> bool {
        self.node_id == T::type_id()
    }

    /// The binary type id of the body, for diagnostics.
    pub fn binary_type_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Decode (or downcast) the body as `T`. Never panics; a type or decode
    /// mismatch is reported as [`Error::UnknownType`].
    pub fn decode_inner<T: ExtensionObjectBody>(&self, ctx: &Context<'_>) -> EncodingResult<T> {
        if !self.inner_is::<T>() {
            return Err(Error::UnknownType(self.node_id.clone()));
        }
        match &self.body {
            ExtensionObjectEncoding::None => Err(Error::UnknownType(self.node_id.clone())),
            ExtensionObjectEncoding::ByteString(bytes) => {
                let mut cursor = Cursor::new(bytes.as_slice());
                T::decode(&mut cursor, ctx)
            }
            ExtensionObjectEncoding::Decoded(v) => v
                .as_any()
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| Error::UnknownType(self.node_id.clone())),
        }
    }

    /// Deep-copy this extension object. A `Decoded` body is round-tripped
    /// through its own codec rather than shallow-cloned; failure during
    /// that round-trip indicates the stored payload was never valid and is
    /// reported as an error, not a panic.
    pub fn deep_copy(&self, ctx: &Context<'_>) -> EncodingResult<ExtensionObject> {
        let body = match &self.body {
            ExtensionObjectEncoding::None => ExtensionObjectEncoding::None,
            ExtensionObjectEncoding::ByteString(b) => ExtensionObjectEncoding::ByteString(b.clone()),
            ExtensionObjectEncoding::Decoded(inner) => {
                ExtensionObjectEncoding::Decoded(inner.dyn_round_trip_clone(ctx)?)
            }
        };
        Ok(ExtensionObject {
            node_id: self.node_id.clone(),
            body,
        })
    }
}

const ENCODING_NONE: u8 = 0x00;
const ENCODING_BYTE_STRING: u8 = 0x01;
const ENCODING_XML: u8 = 0x02;

impl BinaryEncodable for ExtensionObject {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        self.node_id.encode(stream, ctx)?;
        match &self.body {
            ExtensionObjectEncoding::None => {
                stream.write_u8(ENCODING_NONE).map_err(Error::from)
            }
            ExtensionObjectEncoding::ByteString(bytes) => {
                stream.write_u8(ENCODING_BYTE_STRING).map_err(Error::from)?;
                write_byte_string(stream, Some(bytes))
            }
            ExtensionObjectEncoding::Decoded(inner) => {
                stream.write_u8(ENCODING_BYTE_STRING).map_err(Error::from)?;
                let mut buf = Vec::new();
                inner.dyn_encode(&mut buf, ctx)?;
                write_byte_string(stream, Some(&buf))
            }
        }
    }
}

impl BinaryDecodable for ExtensionObject {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let node_id = NodeId::decode(stream, ctx)?;
        let encoding = stream.read_u8().map_err(Error::from)?;
        let body = match encoding {
            ENCODING_NONE => ExtensionObjectEncoding::None,
            ENCODING_BYTE_STRING => {
                let bytes = read_byte_string(stream, 0)?.unwrap_or_default();
                ExtensionObjectEncoding::ByteString(bytes)
            }
            ENCODING_XML => return Err(Error::UnsupportedEncoding("xml element")),
            other => return Err(Error::InvalidLength(other as i32, "extension object encoding byte")),
        };
        Ok(ExtensionObject { node_id, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Dummy(i32);

    impl BinaryEncodable for Dummy {
        fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
            self.0.encode(stream, ctx)
        }
    }
    impl BinaryDecodable for Dummy {
        fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
            Ok(Dummy(i32::decode(stream, ctx)?))
        }
    }
    impl ExtensionObjectBody for Dummy {
        fn type_id() -> NodeId {
            NodeId::new(1, 999)
        }
    }

    #[test]
    fn null_round_trips() {
        let ctx = Context::none();
        let eo = ExtensionObject::null();
        let mut buf = Vec::new();
        eo.encode(&mut buf, &ctx).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let decoded = ExtensionObject::decode(&mut cur, &ctx).unwrap();
        assert!(matches!(decoded.body, ExtensionObjectEncoding::None));
    }

    #[test]
    fn decoded_body_round_trips_through_bytes() {
        let ctx = Context::none();
        let eo = ExtensionObject::from_message(Dummy(42));
        let mut buf = Vec::new();
        eo.encode(&mut buf, &ctx).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let decoded = ExtensionObject::decode(&mut cur, &ctx).unwrap();
        assert!(decoded.inner_is::<Dummy>());
        assert_eq!(decoded.decode_inner::<Dummy>(&ctx).unwrap(), Dummy(42));
    }

    #[test]
    fn xml_encoding_is_rejected() {
        let ctx = Context::none();
        let mut buf = Vec::new();
        NodeId::null().encode(&mut buf, &ctx).unwrap();
        buf.push(ENCODING_XML);
        let mut cur = std::io::Cursor::new(buf);
        assert!(matches!(
            ExtensionObject::decode(&mut cur, &ctx),
            Err(Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn deep_copy_round_trips_decoded_body_instead_of_cloning_pointer() {
        let ctx = Context::none();
        let eo = ExtensionObject::from_message(Dummy(7));
        let copy = eo.deep_copy(&ctx).unwrap();
        assert_eq!(copy.decode_inner::<Dummy>(&ctx).unwrap(), Dummy(7));
    }
}
