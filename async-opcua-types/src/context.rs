//! Namespace index remapping.
//!
//! Both client and server may decode payloads encoded against a namespace
//! table that differs from the process-wide one (e.g. a payload forwarded
//! from another server, or replayed from a capture). The [`Context`] carries
//! an optional `local -> canonical` index map that every decoded node
//! identifier is passed through. Absent mapping entries pass through
//! unchanged, and a context with no map at all is a pure no-op -- this is an
//! injected transformer held by the decoder, never global state.

use hashbrown::HashMap;

/// Namespace index remapping and decode-time options, threaded through every
/// codec entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context<'a> {
    index_map: Option<&'a HashMap<u16, u16>>,
    /// Maximum size, in bytes, of an incoming message. `0` means unlimited.
    pub max_message_size: usize,
    /// Maximum number of elements accepted in a single array. `0` means
    /// unlimited.
    pub max_array_length: usize,
    /// Maximum length accepted for a single string or byte string. `0` means
    /// unlimited.
    pub max_string_length: usize,
}

impl<'a> Context<'a> {
    /// A context with no namespace remapping and no limits.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a context carrying the given namespace index map.
    pub fn with_index_map(index_map: &'a HashMap<u16, u16>) -> Self {
        Self {
            index_map: Some(index_map),
            ..Self::default()
        }
    }

    /// Translate a namespace index encoded in the wire payload into the
    /// process-wide canonical index. Passes through unchanged if no mapping
    /// is installed, or if the index has no entry in the map.
    pub fn resolve_namespace_index(&self, local: u16) -> u16 {
        match self.index_map {
            Some(map) => map.get(&local).copied().unwrap_or(local),
            None => local,
        }
    }

    /// The inverse of [`Self::resolve_namespace_index`]: given a canonical
    /// index, find the local index that maps to it (used when re-encoding a
    /// value for a peer with a different namespace table). Falls back to the
    /// canonical index itself if no entry maps to it.
    pub fn resolve_namespace_index_inverse(&self, canonical: u16) -> u16 {
        match self.index_map {
            Some(map) => map
                .iter()
                .find(|(_, v)| **v == canonical)
                .map(|(k, _)| *k)
                .unwrap_or(canonical),
            None => canonical,
        }
    }
}
