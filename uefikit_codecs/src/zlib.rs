//! zlib codec for GUID-defined sections.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use uefikit_image::codec::{Codec, CodecError};

/// In-process zlib via `flate2`.
#[derive(Default, Clone, Copy)]
pub struct Zlib;

impl Codec for Zlib {
    fn name(&self) -> &'static str {
        "ZLIB"
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoded = Vec::new();
        ZlibDecoder::new(encoded)
            .read_to_end(&mut decoded)
            .map_err(|err| CodecError(format!("zlib inflate: {err}")))?;
        Ok(decoded)
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(decoded).map_err(|err| CodecError(format!("zlib deflate: {err}")))?;
        encoder.finish().map_err(|err| CodecError(format!("zlib deflate: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let payload: Vec<u8> = (0..4096u32).flat_map(u32::to_le_bytes).collect();
        let codec = Zlib;
        let encoded = codec.encode(&payload).unwrap();
        assert!(encoded.len() < payload.len());
        assert_eq!(codec.decode(&encoded).unwrap(), payload);
    }
}
