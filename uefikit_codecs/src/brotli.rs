//! Brotli codec for GUID-defined sections.
//!
//! The firmware wrapper prefixes the raw brotli stream with two 8-byte
//! little-endian values: the uncompressed size and a scratch-buffer size
//! hint for the in-firmware decompressor. Decoding runs in-process;
//! encoding shells out to the system `brotli` command.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use uefikit_image::codec::{Codec, CodecError};

/// Size of the firmware wrapper in front of the brotli stream.
pub const WRAPPER_HEADER_SIZE: usize = 16;

// Decompressor allocation hint recorded alongside the stream; generous
// enough for the brotli state of any quality level.
const SCRATCH_HINT: u64 = 0x40_0000;

/// Brotli with in-process decode and system-command encode.
#[derive(Clone)]
pub struct SystemBrotli {
    brotli_path: String,
}

impl SystemBrotli {
    pub fn new(brotli_path: impl Into<String>) -> Self {
        SystemBrotli { brotli_path: brotli_path.into() }
    }
}

impl Codec for SystemBrotli {
    fn name(&self) -> &'static str {
        "BROTLI"
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        if encoded.len() < WRAPPER_HEADER_SIZE {
            return Err(CodecError(format!(
                "brotli section of {} bytes cannot hold its {WRAPPER_HEADER_SIZE}-byte header",
                encoded.len()
            )));
        }
        let decoded_size = u64::from_le_bytes(encoded[0..8].try_into().unwrap());
        let mut decoded = Vec::with_capacity(decoded_size as usize);
        brotli_decompressor::BrotliDecompress(
            &mut Cursor::new(&encoded[WRAPPER_HEADER_SIZE..]),
            &mut decoded,
        )
        .map_err(|err| CodecError(format!("brotli decompress: {err}")))?;
        if decoded.len() as u64 != decoded_size {
            return Err(CodecError(format!(
                "brotli stream expanded to {} bytes, header claims {decoded_size}",
                decoded.len()
            )));
        }
        Ok(decoded)
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut child = Command::new(&self.brotli_path)
            .args(["--stdout", "-q", "9"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CodecError("brotli stdin unavailable".to_string()))?;
        // Feed stdin from a second thread; draining stdout at the same
        // time keeps large payloads from stalling on a full pipe.
        let output = std::thread::scope(|scope| -> Result<_, CodecError> {
            let writer = scope.spawn(move || stdin.write_all(decoded));
            let output = child.wait_with_output()?;
            writer
                .join()
                .map_err(|_| CodecError("brotli stdin writer panicked".to_string()))??;
            Ok(output)
        })?;
        if !output.status.success() {
            return Err(CodecError(format!(
                "{} exited with {}",
                self.brotli_path, output.status
            )));
        }

        let mut encoded = Vec::with_capacity(WRAPPER_HEADER_SIZE + output.stdout.len());
        encoded.extend_from_slice(&(decoded.len() as u64).to_le_bytes());
        encoded.extend_from_slice(&SCRATCH_HINT.max(decoded.len() as u64).to_le_bytes());
        encoded.extend_from_slice(&output.stdout);
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_wrapper_is_rejected() {
        let codec = SystemBrotli::new("brotli");
        assert!(codec.decode(&[0u8; 8]).is_err());
    }

    // Encoding needs the system brotli command, so the decode side is
    // exercised against a stream it produced when one is available.
    #[test]
    fn round_trip_when_system_brotli_exists() {
        let codec = SystemBrotli::new("brotli");
        let payload = b"brotli round trip payload".repeat(32);
        match codec.encode(&payload) {
            Ok(encoded) => {
                assert_eq!(
                    u64::from_le_bytes(encoded[0..8].try_into().unwrap()),
                    payload.len() as u64
                );
                assert_eq!(codec.decode(&encoded).unwrap(), payload);
            }
            Err(_) => eprintln!("system brotli unavailable, skipping round trip"),
        }
    }
}
