//! The compression-codec contract used by GUID-defined sections.
//!
//! The core never hardcodes a particular codec: a [`CodecRegistry`] is
//! injected through [`crate::ParseContext`] and consulted by GUID. The
//! implementations live in the `uefikit_codecs` crate; this module only
//! defines the dispatch surface.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::fmt;

use thiserror::Error;
use uefikit_pi::Guid;

/// Failure inside a codec backend (including a failed external command).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError(err.to_string())
    }
}

/// A single compression scheme. `decode(encode(x)) == x` must hold for all
/// inputs within the scheme's supported range.
pub trait Codec {
    /// Short scheme tag recorded in the manifest, e.g. `"LZMA"`.
    fn name(&self) -> &'static str;

    /// Expand an encoded payload.
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Produce an encoded payload.
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// GUID-to-codec lookup table.
#[derive(Default)]
pub struct CodecRegistry {
    entries: Vec<(Guid, Box<dyn Codec>)>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a codec to a GUID-defined section GUID. A later registration
    /// for the same GUID shadows the earlier one.
    pub fn register(&mut self, guid: Guid, codec: Box<dyn Codec>) {
        self.entries.insert(0, (guid, codec));
    }

    /// Look up the codec for a GUID-defined section. `None` means the GUID
    /// is unknown and the payload stays opaque.
    pub fn lookup(&self, guid: &Guid) -> Option<&dyn Codec> {
        self.entries.iter().find(|(g, _)| g == guid).map(|(_, c)| c.as_ref())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.entries.iter().map(|(g, c)| format!("{} => {}", g, c.name())).collect();
        f.debug_struct("CodecRegistry").field("entries", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;
    impl Codec for Reverse {
        fn name(&self) -> &'static str {
            "REVERSE"
        }
        fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(encoded.iter().rev().copied().collect())
        }
        fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(decoded.iter().rev().copied().collect())
        }
    }

    #[test]
    fn lookup_hits_and_misses() {
        let guid: Guid = "3D532050-5CDA-4FD0-879E-0F7F630D5AFB".parse().unwrap();
        let mut registry = CodecRegistry::new();
        registry.register(guid, Box::new(Reverse));
        assert_eq!(registry.lookup(&guid).unwrap().name(), "REVERSE");
        assert!(registry.lookup(&Guid::ZERO).is_none());
    }

    #[test]
    fn codec_round_trip_property() {
        let codec = Reverse;
        let payload = b"hello world".to_vec();
        assert_eq!(codec.decode(&codec.encode(&payload).unwrap()).unwrap(), payload);
    }
}
