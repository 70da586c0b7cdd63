//! Small built-in structured types used inside [`crate::variant::Variant`]
//! and service messages: qualified names and localized text.

use std::io::{Read, Write};

use crate::context::Context;
use crate::encoding::{read_string, write_string, BinaryDecodable, BinaryEncodable};
use crate::error::EncodingResult;

/// A name qualified by a namespace index, used to identify browse names
/// and other structural elements of the (out-of-scope) information model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualifiedName {
    /// Namespace index of the name.
    pub namespace_index: u16,
    /// The name itself.
    pub name: Option<String>,
}

impl QualifiedName {
    /// Construct a qualified name in the given namespace.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: Some(name.into()),
        }
    }

    /// The null qualified name (no namespace, no name).
    pub fn null() -> Self {
        Self::default()
    }
}

impl BinaryEncodable for QualifiedName {
    fn encode(&self, stream: &mut dyn Write, _ctx: &Context<'_>) -> EncodingResult<()> {
        use byteorder::{LittleEndian, WriteBytesExt};
        stream
            .write_u16::<LittleEndian>(self.namespace_index)
            .map_err(crate::error::Error::from)?;
        write_string(stream, self.name.as_deref())
    }
}

impl BinaryDecodable for QualifiedName {
    fn decode(stream: &mut dyn Read, _ctx: &Context<'_>) -> EncodingResult<Self> {
        use byteorder::{LittleEndian, ReadBytesExt};
        let namespace_index = stream.read_u16::<LittleEndian>().map_err(crate::error::Error::from)?;
        let name = read_string(stream, 0)?;
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

/// Human-readable text tagged with a locale, e.g. `("en-US", "Hello")`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalizedText {
    /// RFC 5646 locale identifier, if known.
    pub locale: Option<String>,
    /// The text itself.
    pub text: Option<String>,
}

impl LocalizedText {
    /// Construct a localized text value with no locale tag.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }

    /// The null localized text value.
    pub fn null() -> Self {
        Self::default()
    }
}

const HAS_LOCALE: u8 = 0x01;
const HAS_TEXT: u8 = 0x02;

impl BinaryEncodable for LocalizedText {
    fn encode(&self, stream: &mut dyn Write, _ctx: &Context<'_>) -> EncodingResult<()> {
        use byteorder::WriteBytesExt;
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= HAS_LOCALE;
        }
        if self.text.is_some() {
            mask |= HAS_TEXT;
        }
        stream.write_u8(mask).map_err(crate::error::Error::from)?;
        if let Some(locale) = &self.locale {
            write_string(stream, Some(locale))?;
        }
        if let Some(text) = &self.text {
            write_string(stream, Some(text))?;
        }
        Ok(())
    }
}

impl BinaryDecodable for LocalizedText {
    fn decode(stream: &mut dyn Read, _ctx: &Context<'_>) -> EncodingResult<Self> {
        use byteorder::ReadBytesExt;
        let mask = stream.read_u8().map_err(crate::error::Error::from)?;
        let locale = if mask & HAS_LOCALE != 0 {
            read_string(stream, 0)?
        } else {
            None
        };
        let text = if mask & HAS_TEXT != 0 {
            read_string(stream, 0)?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}
