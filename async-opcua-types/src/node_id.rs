//! Node identifiers.
//!
//! A tagged identifier paired with a namespace index, four binary
//! encodings (two-byte numeric, four-byte numeric, full numeric, and the
//! string/guid/opaque form with a `u16` namespace prefix), and the
//! `ns=N;i=/s=/g=/b=` string grammar.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::context::Context;
use crate::encoding::{read_byte_string, read_string, write_byte_string, write_string, BinaryDecodable, BinaryEncodable};
use crate::error::{Error, EncodingResult};

/// The value half of a [`NodeId`], tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// A numeric identifier.
    Numeric(u32),
    /// A free-form string identifier.
    String(String),
    /// A 128-bit GUID identifier.
    Guid(Uuid),
    /// An opaque byte string identifier.
    Opaque(Vec<u8>),
}

impl Identifier {
    fn kind_tag(&self) -> u8 {
        match self {
            Identifier::Numeric(_) => 0,
            Identifier::String(_) => 1,
            Identifier::Guid(_) => 2,
            Identifier::Opaque(_) => 3,
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.kind_tag().cmp(&other.kind_tag()).then_with(|| match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::String(a), Identifier::String(b)) => a.cmp(b),
            (Identifier::Guid(a), Identifier::Guid(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Identifier::Opaque(a), Identifier::Opaque(b)) => a.cmp(b),
            _ => unreachable!("kind_tag equal implies same variant"),
        })
    }
}

/// Tagged `(namespace, kind, value)` identifying any object in the
/// information model. Null node identifiers (`ns=0, i=0`'s *absence*, not
/// its presence) are represented distinctly -- `NodeId::null()` is a
/// sentinel, not the numeric zero in namespace zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index.
    pub namespace: u16,
    /// The identifier value.
    pub identifier: Identifier,
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.namespace
            .cmp(&other.namespace)
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

const NULL_SENTINEL_NS: u16 = u16::MAX;

impl NodeId {
    /// Construct a numeric node id.
    pub fn new(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Construct a string node id.
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// Construct a guid node id.
    pub fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    /// Construct an opaque (byte string) node id.
    pub fn opaque(namespace: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value.into()),
        }
    }

    /// The distinguished null node id. Distinct from `ns=0;i=0`.
    pub fn null() -> Self {
        Self {
            namespace: NULL_SENTINEL_NS,
            identifier: Identifier::Numeric(0),
        }
    }

    /// Whether this is the distinguished null node id.
    pub fn is_null(&self) -> bool {
        self.namespace == NULL_SENTINEL_NS && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// A numeric node id in namespace 0 (the "core" namespace).
    pub fn core(value: u32) -> Self {
        Self::new(0, value)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "ns=0;i=0");
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace, v),
            Identifier::String(v) => write!(f, "ns={};s={}", self.namespace, v),
            Identifier::Guid(v) => write!(f, "ns={};g={}", self.namespace, v),
            Identifier::Opaque(v) => write!(
                f,
                "ns={};b={}",
                self.namespace,
                base64::engine::general_purpose::STANDARD.encode(v)
            ),
        }
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut namespace = 0u16;
        let mut rest = s;
        if let Some(stripped) = s.strip_prefix("ns=") {
            let (ns_part, tail) = stripped
                .split_once(';')
                .ok_or(Error::InvalidLength(-1, "node id"))?;
            namespace = ns_part
                .parse()
                .map_err(|_| Error::InvalidLength(-1, "node id namespace"))?;
            rest = tail;
        }
        let identifier = if let Some(v) = rest.strip_prefix("i=") {
            Identifier::Numeric(
                v.parse()
                    .map_err(|_| Error::InvalidLength(-1, "numeric node id"))?,
            )
        } else if let Some(v) = rest.strip_prefix("s=") {
            Identifier::String(v.to_string())
        } else if let Some(v) = rest.strip_prefix("g=") {
            Identifier::Guid(
                Uuid::parse_str(v).map_err(|_| Error::InvalidLength(-1, "guid node id"))?,
            )
        } else if let Some(v) = rest.strip_prefix("b=") {
            Identifier::Opaque(
                base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map_err(|_| Error::InvalidLength(-1, "opaque node id"))?,
            )
        } else {
            return Err(Error::InvalidLength(-1, "node id identifier"));
        };
        Ok(NodeId {
            namespace,
            identifier,
        })
    }
}

impl BinaryEncodable for NodeId {
    fn encode(&self, stream: &mut dyn Write, ctx: &Context<'_>) -> EncodingResult<()> {
        let namespace = ctx.resolve_namespace_index_inverse(self.namespace);
        match &self.identifier {
            Identifier::Numeric(v) if namespace == 0 && *v <= u8::MAX as u32 => {
                stream.write_u8(0x00).map_err(Error::from)?;
                stream.write_u8(*v as u8).map_err(Error::from)
            }
            Identifier::Numeric(v) if namespace <= u8::MAX as u16 && *v <= u16::MAX as u32 => {
                stream.write_u8(0x01).map_err(Error::from)?;
                stream.write_u8(namespace as u8).map_err(Error::from)?;
                stream
                    .write_u16::<LittleEndian>(*v as u16)
                    .map_err(Error::from)
            }
            Identifier::Numeric(v) => {
                stream.write_u8(0x02).map_err(Error::from)?;
                stream
                    .write_u16::<LittleEndian>(namespace)
                    .map_err(Error::from)?;
                stream.write_u32::<LittleEndian>(*v).map_err(Error::from)
            }
            Identifier::String(v) => {
                stream.write_u8(0x03).map_err(Error::from)?;
                stream
                    .write_u16::<LittleEndian>(namespace)
                    .map_err(Error::from)?;
                write_string(stream, Some(v))
            }
            Identifier::Guid(v) => {
                stream.write_u8(0x04).map_err(Error::from)?;
                stream
                    .write_u16::<LittleEndian>(namespace)
                    .map_err(Error::from)?;
                stream.write_all(v.as_bytes()).map_err(Error::from)
            }
            Identifier::Opaque(v) => {
                stream.write_u8(0x05).map_err(Error::from)?;
                stream
                    .write_u16::<LittleEndian>(namespace)
                    .map_err(Error::from)?;
                write_byte_string(stream, Some(v))
            }
        }
    }
}

impl BinaryDecodable for NodeId {
    fn decode(stream: &mut dyn Read, ctx: &Context<'_>) -> EncodingResult<Self> {
        let encoding = stream.read_u8().map_err(Error::from)?;
        let (namespace, identifier) = match encoding {
            0x00 => (0u16, Identifier::Numeric(stream.read_u8().map_err(Error::from)? as u32)),
            0x01 => {
                let ns = stream.read_u8().map_err(Error::from)? as u16;
                let v = stream.read_u16::<LittleEndian>().map_err(Error::from)? as u32;
                (ns, Identifier::Numeric(v))
            }
            0x02 => {
                let ns = stream.read_u16::<LittleEndian>().map_err(Error::from)?;
                let v = stream.read_u32::<LittleEndian>().map_err(Error::from)?;
                (ns, Identifier::Numeric(v))
            }
            0x03 => {
                let ns = stream.read_u16::<LittleEndian>().map_err(Error::from)?;
                let s = read_string(stream, 0)?.unwrap_or_default();
                (ns, Identifier::String(s))
            }
            0x04 => {
                let ns = stream.read_u16::<LittleEndian>().map_err(Error::from)?;
                let mut bytes = [0u8; 16];
                stream.read_exact(&mut bytes).map_err(Error::from)?;
                (ns, Identifier::Guid(Uuid::from_bytes(bytes)))
            }
            0x05 => {
                let ns = stream.read_u16::<LittleEndian>().map_err(Error::from)?;
                let b = read_byte_string(stream, 0)?.unwrap_or_default();
                (ns, Identifier::Opaque(b))
            }
            _ => return Err(Error::InvalidLength(encoding as i32, "node id encoding byte")),
        };
        Ok(NodeId {
            namespace: ctx.resolve_namespace_index(namespace),
            identifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_numeric() {
        let id = NodeId::new(1, 42);
        assert_eq!(id.to_string(), "ns=1;i=42");
        assert_eq!(NodeId::from_str("ns=1;i=42").unwrap(), id);
    }

    #[test]
    fn display_and_parse_string() {
        let id = NodeId::string(2, "Hello.World");
        assert_eq!(id.to_string(), "ns=2;s=Hello.World");
        assert_eq!(NodeId::from_str("ns=2;s=Hello.World").unwrap(), id);
    }

    #[test]
    fn null_is_distinct_from_namespace_zero_numeric_zero() {
        assert_ne!(NodeId::null(), NodeId::new(0, 0));
        assert!(NodeId::null().is_null());
        assert!(!NodeId::new(0, 0).is_null());
    }

    #[test]
    fn binary_round_trip_two_byte_form() {
        let ctx = Context::none();
        let id = NodeId::new(0, 10);
        let mut buf = Vec::new();
        id.encode(&mut buf, &ctx).unwrap();
        assert_eq!(buf[0], 0x00);
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(NodeId::decode(&mut cur, &ctx).unwrap(), id);
    }

    #[test]
    fn binary_round_trip_full_numeric_form() {
        let ctx = Context::none();
        let id = NodeId::new(5, 100_000);
        let mut buf = Vec::new();
        id.encode(&mut buf, &ctx).unwrap();
        assert_eq!(buf[0], 0x02);
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(NodeId::decode(&mut cur, &ctx).unwrap(), id);
    }

    #[test]
    fn binary_round_trip_string_form() {
        let ctx = Context::none();
        let id = NodeId::string(3, "abc");
        let mut buf = Vec::new();
        id.encode(&mut buf, &ctx).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(NodeId::decode(&mut cur, &ctx).unwrap(), id);
    }

    #[test]
    fn display_and_parse_opaque() {
        let id = NodeId::opaque(4, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.to_string(), "ns=4;b=3q2+7w==");
        assert_eq!(NodeId::from_str("ns=4;b=3q2+7w==").unwrap(), id);
    }

    #[test]
    fn ordering_is_lexicographic_over_namespace_kind_value() {
        let a = NodeId::new(0, 5);
        let b = NodeId::new(0, 6);
        let c = NodeId::new(1, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn namespace_remapping_applies_on_decode() {
        let mut map = hashbrown::HashMap::new();
        map.insert(2u16, 7u16);
        let ctx = Context::with_index_map(&map);
        let mut buf = Vec::new();
        NodeId::new(2, 1).encode(&mut buf, &Context::none()).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let decoded = NodeId::decode(&mut cur, &ctx).unwrap();
        assert_eq!(decoded.namespace, 7);
    }
}
