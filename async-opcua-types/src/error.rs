use crate::status_code::StatusCode;

/// Internal error type for the value codec.
///
/// Every variant converts into a [`StatusCode`] at the point it crosses a
/// service boundary; nothing in this crate panics on malformed input.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Ran out of bytes while decoding a fixed-size or length-prefixed value.
    #[error("unexpected end of stream while decoding {0}")]
    UnexpectedEof(&'static str),
    /// A length prefix (string, array, byte string) was negative and not the
    /// `-1` null sentinel, or exceeded the configured maximum.
    #[error("invalid length prefix {0} while decoding {1}")]
    InvalidLength(i32, &'static str),
    /// A string field contained invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    /// An extension object body declared an encoding byte the codec does not
    /// accept (XML elements are rejected unconditionally).
    #[error("unsupported extension object encoding: {0}")]
    UnsupportedEncoding(&'static str),
    /// No type loader was registered for the extension object's binary type
    /// id, so a `Decoded` body could not be produced.
    #[error("no type loader registered for type id {0:?}")]
    UnknownType(crate::node_id::NodeId),
    /// The underlying `std::io` layer failed (this only happens for in-memory
    /// buffers in this crate, so it indicates a logic bug, not an I/O fault).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the codec.
pub type EncodingResult<T> = Result<T, Error>;

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::UnexpectedEof(_) | Error::Io(_) => StatusCode::BadDecodingError,
            Error::InvalidLength(..) => StatusCode::BadEncodingLimitsExceeded,
            Error::InvalidUtf8 => StatusCode::BadDecodingError,
            Error::UnsupportedEncoding(_) => StatusCode::BadDecodingError,
            Error::UnknownType(_) => StatusCode::BadDecodingError,
        }
    }
}

impl From<Error> for StatusCode {
    fn from(e: Error) -> Self {
        StatusCode::from(&e)
    }
}
